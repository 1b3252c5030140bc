//! V-trace off-policy correction for self-play batches.
//!
//! Episodes are generated by older model eras (behavior policy μ) and
//! trained on by the current parameters (target policy π). V-trace weights
//! each step with clipped importance ratios to correct the mismatch.
//!
//! ## Key Equations
//!
//! Importance weights, with the log ratio clamped to ±20 before `exp`:
//! - ρ_t = min(ρ̄, π(a_t|s_t) / μ(a_t|s_t))
//! - c_t = min(c̄, π(a_t|s_t) / μ(a_t|s_t))
//!
//! Self-play has no intermediate rewards; every estimator bootstraps toward
//! the final return `R`:
//!
//! - `MC`: target_t = R, adv_t = ρ_t (R − V_t)
//! - `TD0`: δ_t = ρ_t (V_{t+1} − V_t) with V_T = R,
//!   vs_t = V_t + δ_t + c_t (vs_{t+1} − V_{t+1}),
//!   adv_t = ρ_t (vs_{t+1} − V_t) with vs_T = R
//! - `TDLAMBDA`: target_{T−1} = R, target_t = (1−λ) V_{t+1} + λ target_{t+1},
//!   adv_t = ρ_t (target_t − V_t)
//!
//! ## References
//!
//! - Espeholt et al., "IMPALA: Scalable Distributed Deep-RL with
//!   Importance Weighted Actor-Learner Architectures" (2018)

use crate::config::ReturnMode;

/// Maximum log ratio before `exp()`; exp(20) ≈ 4.9e8.
pub const MAX_LOG_RATIO: f32 = 20.0;

/// Importance-weight clip (ρ̄).
pub const RHO_BAR: f32 = 1.0;

/// Trace-cutting clip (c̄).
pub const C_BAR: f32 = 1.0;

/// Clipped importance weights `(ρ, c)` from per-step log-probabilities.
///
/// A non-finite log ratio falls back to on-policy (ratio 1).
pub fn clipped_importance_weights(
    behavior_log_probs: &[f32],
    target_log_probs: &[f32],
    rho_bar: f32,
    c_bar: f32,
) -> (Vec<f32>, Vec<f32>) {
    assert_eq!(behavior_log_probs.len(), target_log_probs.len());
    behavior_log_probs
        .iter()
        .zip(target_log_probs)
        .map(|(&b, &t)| {
            let log_ratio = t - b;
            let clamped = if log_ratio.is_finite() {
                log_ratio.clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO)
            } else {
                0.0
            };
            let ratio = clamped.exp();
            (ratio.min(rho_bar), ratio.min(c_bar))
        })
        .unzip()
}

/// Fold the opponent's view into two-player zero-sum values in place.
///
/// `values` is `[.., 2]`. The opponent estimate is the negated, swapped
/// pair; it is averaged with the own estimate in full-observation mode and
/// added otherwise (where only one of the two is non-zero).
pub fn fold_zero_sum(values: &mut [f32], full_observation: bool) {
    for pair in values.chunks_exact_mut(2) {
        let (own0, own1) = (pair[0], pair[1]);
        let (opp0, opp1) = (-own1, -own0);
        if full_observation {
            pair[0] = (own0 + opp0) / 2.0;
            pair[1] = (own1 + opp1) / 2.0;
        } else {
            pair[0] = own0 + opp0;
            pair[1] = own1 + opp1;
        }
    }
}

/// Replace values of steps without a turn owner by the final return.
///
/// `values` is `[T, B, P]`, `presence` is `[T, B]`, `returns` is `[B, P]`.
pub fn blend_returns(values: &mut [f32], presence: &[f32], returns: &[f32], num_players: usize) {
    let batch_size = returns.len() / num_players;
    for (tb, &g) in presence.iter().enumerate() {
        let b = tb % batch_size;
        for p in 0..num_players {
            let v = &mut values[tb * num_players + p];
            *v = *v * g + returns[b * num_players + p] * (1.0 - g);
        }
    }
}

/// Monte Carlo targets for one `(episode, player)` column.
pub fn monte_carlo(
    values: &[f32],
    ret: f32,
    rhos: &[f32],
    targets: &mut [f32],
    advantages: &mut [f32],
) {
    for t in 0..values.len() {
        targets[t] = ret;
        advantages[t] = rhos[t] * (ret - values[t]);
    }
}

/// One-step V-trace for one column. `targets` doubles as the accumulator.
pub fn td_zero(
    values: &[f32],
    ret: f32,
    rhos: &[f32],
    cs: &[f32],
    targets: &mut [f32],
    advantages: &mut [f32],
) {
    let n = values.len();
    if n == 0 {
        return;
    }

    // Backward pass: acc_t = δ_t + c_t · acc_{t+1}, acc_{T-1} = δ_{T-1}.
    let mut acc = 0.0f32;
    for t in (0..n).rev() {
        let next_value = if t + 1 < n { values[t + 1] } else { ret };
        let delta = rhos[t] * (next_value - values[t]);
        acc = if t + 1 < n { delta + cs[t] * acc } else { delta };
        targets[t] = acc + values[t];
    }

    for t in 0..n {
        let next_vs = if t + 1 < n { targets[t + 1] } else { ret };
        advantages[t] = rhos[t] * (next_vs - values[t]);
    }
}

/// λ-return for one column.
pub fn td_lambda(
    values: &[f32],
    ret: f32,
    rhos: &[f32],
    lambda: f32,
    targets: &mut [f32],
    advantages: &mut [f32],
) {
    let n = values.len();
    if n == 0 {
        return;
    }

    targets[n - 1] = ret;
    for t in (0..n - 1).rev() {
        targets[t] = (1.0 - lambda) * values[t + 1] + lambda * targets[t + 1];
    }
    for t in 0..n {
        advantages[t] = rhos[t] * (targets[t] - values[t]);
    }
}

/// Inputs of a batched correction, all time-major.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionInput<'a> {
    /// Detached values after folding and blending, `[T, B, P]`.
    pub values: &'a [f32],
    /// Final returns, `[B, P]`.
    pub returns: &'a [f32],
    /// Clipped ρ, `[T, B]`.
    pub rhos: &'a [f32],
    /// Clipped c, `[T, B]`.
    pub cs: &'a [f32],
    pub steps: usize,
    pub batch_size: usize,
    pub num_players: usize,
}

/// Value targets and advantages, both `[T, B, P]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Corrections {
    pub value_targets: Vec<f32>,
    pub advantages: Vec<f32>,
}

/// Per-column scratch buffers reused across columns and batches.
#[derive(Debug, Default)]
pub struct CorrectionArena {
    values: Vec<f32>,
    rhos: Vec<f32>,
    cs: Vec<f32>,
    targets: Vec<f32>,
    advantages: Vec<f32>,
}

impl CorrectionArena {
    pub fn new(steps: usize) -> Self {
        let mut arena = Self::default();
        arena.reserve(steps);
        arena
    }

    fn reserve(&mut self, steps: usize) {
        for buf in [
            &mut self.values,
            &mut self.rhos,
            &mut self.cs,
            &mut self.targets,
            &mut self.advantages,
        ] {
            buf.clear();
            buf.resize(steps, 0.0);
        }
    }

    /// Run the selected estimator over every `(episode, player)` column.
    pub fn compute(&mut self, mode: ReturnMode, lambda: f32, input: CorrectionInput<'_>) -> Corrections {
        let CorrectionInput {
            values,
            returns,
            rhos,
            cs,
            steps,
            batch_size,
            num_players,
        } = input;
        debug_assert_eq!(values.len(), steps * batch_size * num_players);
        debug_assert_eq!(rhos.len(), steps * batch_size);

        self.reserve(steps);
        let total = steps * batch_size * num_players;
        let mut value_targets = vec![0.0f32; total];
        let mut advantages = vec![0.0f32; total];

        for b in 0..batch_size {
            for p in 0..num_players {
                for t in 0..steps {
                    let tb = t * batch_size + b;
                    self.values[t] = values[tb * num_players + p];
                    self.rhos[t] = rhos[tb];
                    self.cs[t] = cs[tb];
                }
                let ret = returns[b * num_players + p];

                match mode {
                    ReturnMode::Mc => monte_carlo(
                        &self.values,
                        ret,
                        &self.rhos,
                        &mut self.targets,
                        &mut self.advantages,
                    ),
                    ReturnMode::Td0 => td_zero(
                        &self.values,
                        ret,
                        &self.rhos,
                        &self.cs,
                        &mut self.targets,
                        &mut self.advantages,
                    ),
                    ReturnMode::TdLambda => td_lambda(
                        &self.values,
                        ret,
                        &self.rhos,
                        lambda,
                        &mut self.targets,
                        &mut self.advantages,
                    ),
                }

                for t in 0..steps {
                    let at = (t * batch_size + b) * num_players + p;
                    value_targets[at] = self.targets[t];
                    advantages[at] = self.advantages[t];
                }
            }
        }

        Corrections {
            value_targets,
            advantages,
        }
    }
}

/// Convenience wrapper allocating a fresh arena.
pub fn compute_corrections(mode: ReturnMode, lambda: f32, input: CorrectionInput<'_>) -> Corrections {
    CorrectionArena::new(input.steps).compute(mode, lambda, input)
}
