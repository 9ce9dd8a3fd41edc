//! Job runtimes for pipewright.
//!
//! Provides `JobRuntime` implementations for running CI jobs:
//! - Local Docker

pub mod docker;

pub use docker::DockerJobRuntime;
pub use pipewright_core::runtime::{JobOutcome, JobRuntime};
