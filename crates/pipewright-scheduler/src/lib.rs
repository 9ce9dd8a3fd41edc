//! Status aggregation and job dispatch for pipewright.
//!
//! - `status`: recomputes stage and pipeline status from job executions.
//! - `dispatch`: runs job executions received from the message feed, at most
//!   one attempt per execution at a time, with cooperative cancellation.
//! - `feed` / `worker`: the message feed abstraction and the consumer loop
//!   that drains it into the dispatch queue.

pub mod dispatch;
pub mod error;
pub mod feed;
pub mod status;
pub mod worker;

pub use dispatch::{DispatchConfig, DispatchOutcome, JobDispatchQueue};
pub use error::{SchedulerError, SchedulerResult};
pub use feed::{ChannelFeed, Delivery, MessageFeed, PgMessageFeed};
pub use status::StatusAggregator;
pub use worker::Worker;
