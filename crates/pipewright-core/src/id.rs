//! Resource identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier shared by every entity and execution record.
///
/// New ids are UUIDv7 (time-ordered). Ids received from the message feed or
/// the database may be any UUID version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse a textual id, rejecting blank input.
    ///
    /// Surrounding whitespace is ignored since ids arrive as raw message
    /// payloads.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Uuid::parse_str(trimmed).ok().map(Self)
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ResourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ResourceId> for Uuid {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ResourceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_display() {
        let id = ResourceId::new();
        assert_eq!(ResourceId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let id = ResourceId::new();
        assert_eq!(ResourceId::parse(&format!("  {}\n", id)), Some(id));
    }

    #[test]
    fn test_parse_rejects_blank_and_garbage() {
        assert_eq!(ResourceId::parse(""), None);
        assert_eq!(ResourceId::parse("   "), None);
        assert_eq!(ResourceId::parse("not-a-uuid"), None);
        assert_eq!(ResourceId::parse("1234"), None);
    }
}
