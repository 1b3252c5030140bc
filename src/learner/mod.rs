//! Trainer thread and its control handle.
//!
//! - `Trainer`: owns the live parameters and runs V-trace updates
//! - `TrainerHandle`: snapshot requests from the coordinator

pub mod trainer;

#[cfg(test)]
mod tests;

pub use trainer::{
    create_optimizer, EpochStats, Trainer, TrainerConfig, TrainerHandle, TrainerPhase,
    TrainError, UpdateRequester, MAX_NONFINITE_BATCHES,
};
