//! Core domain types and traits for the pipewright execution core.
//!
//! This crate contains:
//! - Resource identifiers
//! - Execution status and the status fold used for rollups
//! - Pipeline / stage / job entities and their execution records
//! - Status report types returned by aggregation
//! - The `JobRuntime` trait implemented by job execution backends

pub mod error;
pub mod execution;
pub mod id;
pub mod report;
pub mod runtime;
pub mod status;

pub use error::{Error, Result};
pub use id::ResourceId;
pub use status::ExecutionStatus;
