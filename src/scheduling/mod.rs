//! Learning rate scheduling.

pub mod lr_scheduler;

pub use lr_scheduler::{DataVolumeLR, LRScheduler};
