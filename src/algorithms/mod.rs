//! Off-policy correction and loss computation.
//!
//! - [`vtrace`]: importance weights and the three return estimators, on host
//!   memory
//! - [`loss`]: forward pass over a batch and loss composition on burn tensors

pub mod loss;
pub mod vtrace;

pub use loss::{
    compose_losses, forward_prediction, stable_log_softmax, vtrace_loss, LossConfig, LossOutput,
    Prediction,
};
pub use vtrace::{
    blend_returns, clipped_importance_weights, compute_corrections, fold_zero_sum, monte_carlo,
    td_lambda, td_zero, CorrectionArena, CorrectionInput, Corrections, MAX_LOG_RATIO,
};

#[cfg(test)]
mod tests;
