//! Episode storage and batch assembly.
//!
//! - [`EpisodeStore`]: bounded, recency-biased store of compressed episodes
//! - [`Batch`] / [`make_batch`]: fixed-length padded training windows
//! - [`Batcher`]: worker threads feeding a bounded batch queue

pub mod batch;
pub mod batcher;
pub mod episode_store;

pub use batch::{assemble_batch, make_batch, window_candidates, Batch, BatchError};
pub use batcher::{Batcher, BatcherConfig};
pub use episode_store::{acceptance_probability, EpisodeStore, EpisodeStoreConfig};

#[cfg(test)]
mod tests;
