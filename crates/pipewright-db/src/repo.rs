//! Repository traits and implementations.

pub mod execution;
pub mod memory;
pub mod message;

pub use execution::{ExecutionStore, PgExecutionStore};
pub use memory::{MemoryExecutionStore, WriteCounts};
pub use message::{MessageQueueRepo, PgMessageQueue, QueuedMessage};
