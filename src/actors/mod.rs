//! Worker side of self-play.
//!
//! - `generate`: one self-play episode with a policy per seat
//! - `evaluate`: one game of an era against the uniform baseline
//! - `Worker`: request/play/submit loop over any [`Client`](crate::transport::Client)
//! - `WorkerPool`: local worker threads, or remote ones via `join_remote`

pub mod evaluation;
pub mod generation;
pub mod worker;
pub mod worker_pool;

#[cfg(test)]
mod tests;

pub use evaluation::evaluate;
pub use generation::{generate, select_action};
pub use worker::{ModelCache, Role, Worker, WorkerConfig, WorkerError, WorkerStats};
pub use worker_pool::{join_remote, WorkerHandle, WorkerPool};
