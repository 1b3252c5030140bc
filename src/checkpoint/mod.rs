//! Snapshot persistence.

pub mod checkpointer;

pub use checkpointer::{CheckpointError, Checkpointer, CheckpointerConfig};
