//! HTTP API for pipewright.
//!
//! Exposes pipeline status aggregation and the worker's dispatch queue.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
