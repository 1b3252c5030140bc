//! Training entry points.

pub mod selfplay_runner;


pub use selfplay_runner::{launch, RunSummary, RunnerError, SelfPlayRunner};
