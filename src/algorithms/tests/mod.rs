//! Tests for the algorithms module.
//!
//! - `vtrace_tests`: importance weights, zero-sum folding and the estimators
//! - `loss_tests`: forward pass and loss composition on the NdArray backend
