//! KDL configuration parsing for pipewright.
//!
//! The server and worker read a single `system.kdl` file describing the
//! database, HTTP bind address, worker pool and logging. Every node is
//! optional; environment variables override file values.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, LogConfig, LogFormat, ServerConfig, SystemConfig, WorkerConfig,
};
