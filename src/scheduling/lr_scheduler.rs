//! Learning rate scheduling driven by training data volume.
//!
//! Batches carry a variable amount of real data (padding is masked out), so
//! the step size follows an exponential moving average of unmasked steps per
//! batch rather than a fixed schedule:
//!
//! ```text
//! ema ← 0.8 · ema + 0.2 · data_count / (0.01 + batch_count)
//! lr  = base_lr · ema · (1 + steps · 1e-5)
//! ```
//!
//! # Data Integrity
//!
//! Non-finite or negative observations are ignored in release builds and
//! trigger a debug panic.

/// Learning rate scheduler trait.
pub trait LRScheduler: Send + Sync {
    /// Get the learning rate for a given step.
    fn get_lr(&self, step: usize) -> f64;
}

/// Smoothing factor of the data-volume average.
const EMA_DECAY: f64 = 0.8;

/// Growth of the learning rate per optimizer step.
const STEP_GROWTH: f64 = 1e-5;

#[derive(Debug, Clone)]
pub struct DataVolumeLR {
    base_lr: f64,
    data_count_ema: f64,
}

impl DataVolumeLR {
    /// `initial_data_count` seeds the average, typically
    /// `batch_size * forward_steps`.
    pub fn new(base_lr: f64, initial_data_count: f64) -> Self {
        debug_assert!(
            base_lr.is_finite() && base_lr >= 0.0,
            "DataVolumeLR: base_lr must be finite and non-negative, got {}",
            base_lr
        );
        let base_lr = if base_lr.is_finite() && base_lr >= 0.0 { base_lr } else { 0.0 };
        Self {
            base_lr,
            data_count_ema: initial_data_count,
        }
    }

    /// Fold the data seen since the last snapshot into the average.
    pub fn observe(&mut self, data_count: f64, batch_count: usize) {
        debug_assert!(
            data_count.is_finite() && data_count >= 0.0,
            "DataVolumeLR: data_count must be finite and non-negative, got {}",
            data_count
        );
        if !data_count.is_finite() || data_count < 0.0 {
            return;
        }
        let per_batch = data_count / (1e-2 + batch_count as f64);
        self.data_count_ema = self.data_count_ema * EMA_DECAY + per_batch * (1.0 - EMA_DECAY);
    }

    pub fn data_count_ema(&self) -> f64 {
        self.data_count_ema
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }
}

impl LRScheduler for DataVolumeLR {
    fn get_lr(&self, step: usize) -> f64 {
        self.base_lr * self.data_count_ema * (1.0 + step as f64 * STEP_GROWTH)
    }
}
