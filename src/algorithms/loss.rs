//! Forward pass and V-trace loss over a [`Batch`].
//!
//! ```text
//! Batch ─► forward_prediction ─► (policies [T,B,A], values [T,B,P])
//!            │                                   │ detach
//!            ▼                                   ▼
//!      log π(a), log μ(a) ─► ρ, c ─► CorrectionArena (MC / TD0 / TDLAMBDA)
//!                                                │
//!                                                ▼
//!                         compose_losses ─► total, policy, value, entropy
//! ```

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use super::vtrace::{
    blend_returns, clipped_importance_weights, fold_zero_sum, CorrectionArena, CorrectionInput,
    C_BAR, RHO_BAR,
};
use crate::buffers::batch::Batch;
use crate::config::{ReturnMode, TrainConfig};
use crate::model::{to_host, PolicyValueModel};

/// Weight of progress in the entropy schedule: `1 - 0.9 * progress`.
const ENTROPY_DECAY: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossConfig {
    pub return_mode: ReturnMode,
    pub lambda: f32,
    pub entropy_coef: f32,
    pub full_observation: bool,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            return_mode: ReturnMode::Td0,
            lambda: 0.7,
            entropy_coef: 0.3,
            full_observation: false,
        }
    }
}

impl LossConfig {
    pub fn from_train_config(config: &TrainConfig) -> Self {
        Self {
            return_mode: config.return_mode,
            lambda: config.lambda,
            entropy_coef: config.entropy_coef,
            full_observation: config.observation,
        }
    }

    pub fn with_return_mode(mut self, mode: ReturnMode) -> Self {
        self.return_mode = mode;
        self
    }
}

/// Turn-player policy logits and masked values of a batch.
#[derive(Debug, Clone)]
pub struct Prediction<B: Backend> {
    /// `[T, B, A]`, penalty already subtracted.
    pub policies: Tensor<B, 3>,
    /// `[T, B, P]`, multiplied by the value mask.
    pub values: Tensor<B, 3>,
}

/// Summed losses of one batch.
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    /// Differentiable total loss.
    pub total: Tensor<B, 1>,
    pub policy: f32,
    pub value: f32,
    pub entropy: f32,
    /// Number of unmasked turn steps.
    pub data_count: f32,
}

/// Log-softmax with the max subtracted first; rows holding the 1e32 penalty
/// stay finite.
pub fn stable_log_softmax<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let shifted = x.clone() - x.detach().max_dim(dim);
    shifted.clone() - shifted.exp().sum_dim(dim).log()
}

pub(crate) fn tensor3<B: Backend>(data: &[f32], dims: [usize; 3], device: &B::Device) -> Tensor<B, 3> {
    Tensor::<B, 1>::from_floats(data, device).reshape(dims)
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    to_host(t.detach()).first().copied().unwrap_or(0.0)
}

pub fn forward_prediction<B, M>(model: &M, batch: &Batch, device: &B::Device) -> Prediction<B>
where
    B: Backend,
    M: PolicyValueModel<B>,
{
    let (t, b, p) = (batch.steps, batch.batch_size, batch.num_players);
    let (po, s, a) = (batch.observed_players, batch.observation_size, batch.num_actions);

    let obs = Tensor::<B, 1>::from_floats(batch.observations.as_slice(), device);
    let turn_mask = tensor3::<B>(&batch.turn_mask, [t, b, p], device);
    let value_mask = tensor3::<B>(&batch.value_mask, [t, b, p], device);

    let (logits, values): (Tensor<B, 4>, Tensor<B, 3>) = match model.init_hidden(b * p, device) {
        None => {
            let out = model.forward(obs.reshape([t * b * po, s]), None);
            (out.policy.reshape([t, b, po, a]), out.value.reshape([t, b, po]))
        }
        Some(initial) => {
            let obs = obs.reshape([t, b * po, s]);
            let active = (turn_mask.clone() + value_mask.clone()).clamp(0.0, 1.0);
            let mut hidden: Vec<Tensor<B, 3>> = initial
                .into_iter()
                .map(|h| {
                    let [_, hs] = h.dims();
                    h.reshape([b, p, hs])
                })
                .collect();

            let mut step_logits = Vec::with_capacity(t);
            let mut step_values = Vec::with_capacity(t);
            for i in 0..t {
                let obs_i = obs.clone().slice([i..i + 1, 0..b * po, 0..s]).reshape([b * po, s]);
                let mask_i: Tensor<B, 3> = active.clone().slice([i..i + 1, 0..b, 0..p]).reshape([b, p, 1]);

                // Entries without a turn or value target carry no state.
                hidden = hidden.into_iter().map(|h| h * mask_i.clone()).collect();
                let hidden_in: Vec<Tensor<B, 2>> = hidden
                    .iter()
                    .map(|h| {
                        let [_, _, hs] = h.dims();
                        if po == 1 {
                            h.clone().sum_dim(1).reshape([b, hs])
                        } else {
                            h.clone().reshape([b * p, hs])
                        }
                    })
                    .collect();

                let out = model.forward(obs_i, Some(hidden_in));
                step_logits.push(out.policy.reshape([1, b, po, a]));
                step_values.push(out.value.reshape([1, b, po]));

                if let Some(next) = out.hidden {
                    let keep = mask_i.clone().neg().add_scalar(1.0);
                    hidden = hidden
                        .into_iter()
                        .zip(next)
                        .map(|(h, nh)| {
                            let [_, _, hs] = h.dims();
                            let nh = nh.reshape([b, po, hs]);
                            let nh = if po == 1 { nh.repeat_dim(1, p) } else { nh };
                            h * keep.clone() + nh * mask_i.clone()
                        })
                        .collect();
                }
            }
            (Tensor::cat(step_logits, 0), Tensor::cat(step_values, 0))
        }
    };

    let penalty = tensor3::<B>(&batch.action_penalty, [t, b, a], device);
    let turn_logits = if po == 1 {
        let presence = turn_mask.clone().sum_dim(2);
        logits.reshape([t, b, a]) * presence
    } else {
        let weights: Tensor<B, 4> = turn_mask.reshape([t, b, p, 1]);
        (logits * weights).sum_dim(2).reshape([t, b, a])
    };
    let policies = turn_logits - penalty;

    let values = if po == 1 { values.repeat_dim(2, p) } else { values };
    let values = values * value_mask;

    Prediction { policies, values }
}

/// Combine per-step quantities into the summed losses.
#[allow(clippy::too_many_arguments)]
pub fn compose_losses<B: Backend>(
    policies: Tensor<B, 3>,
    values: Tensor<B, 3>,
    log_selected: Tensor<B, 3>,
    advantages: Tensor<B, 3>,
    value_targets: Tensor<B, 3>,
    turn_mask: Tensor<B, 3>,
    value_mask: Tensor<B, 3>,
    progress: Tensor<B, 3>,
    entropy_coef: f32,
) -> LossOutput<B> {
    let data_count = scalar(turn_mask.clone().sum());
    let presence = turn_mask.clone().sum_dim(2);

    let turn_advantages = (advantages * turn_mask).sum_dim(2);
    let policy_loss = (log_selected.neg() * turn_advantages).sum();
    let value_loss = ((values - value_targets).powf_scalar(2.0) * value_mask)
        .sum()
        .div_scalar(2.0);

    let log_probs = stable_log_softmax(policies, 2);
    let probs = log_probs.clone().exp();
    let entropy = (probs * log_probs).sum_dim(2).neg() * presence;
    let entropy_sum = entropy.clone().sum();
    let weight = progress.mul_scalar(-ENTROPY_DECAY).add_scalar(1.0);
    let total = policy_loss.clone() + value_loss.clone()
        - (entropy * weight).sum().mul_scalar(entropy_coef);

    LossOutput {
        total,
        policy: scalar(policy_loss),
        value: scalar(value_loss),
        entropy: scalar(entropy_sum),
        data_count,
    }
}

/// Full V-trace loss of a batch.
pub fn vtrace_loss<B, M>(
    model: &M,
    batch: &Batch,
    config: &LossConfig,
    arena: &mut CorrectionArena,
    device: &B::Device,
) -> LossOutput<B>
where
    B: Backend,
    M: PolicyValueModel<B>,
{
    let (t, b, p, a) = (batch.steps, batch.batch_size, batch.num_players, batch.num_actions);
    let Prediction { policies, values } = forward_prediction(model, batch, device);

    let presence = batch.turn_presence();
    let gmask = tensor3::<B>(&presence, [t, b, 1], device);
    let actions = Tensor::<B, 1, Int>::from_ints(batch.actions.as_slice(), device).reshape([t, b, 1]);
    // Actions were sampled among legal moves only, so the behavior
    // distribution carries the same penalty as the target one.
    let behavior = tensor3::<B>(&batch.behavior_logits, [t, b, a], device)
        - tensor3::<B>(&batch.action_penalty, [t, b, a], device);

    let log_selected_b = stable_log_softmax(behavior, 2).gather(2, actions.clone()) * gmask.clone();
    let log_selected_t = stable_log_softmax(policies.clone(), 2).gather(2, actions) * gmask;

    let (rhos, cs) = clipped_importance_weights(
        &to_host(log_selected_b),
        &to_host(log_selected_t.clone().detach()),
        RHO_BAR,
        C_BAR,
    );

    let mut values_nograd = to_host(values.clone().detach());
    if p == 2 {
        fold_zero_sum(&mut values_nograd, config.full_observation);
    }
    blend_returns(&mut values_nograd, &presence, &batch.returns, p);

    let corrections = arena.compute(
        config.return_mode,
        config.lambda,
        CorrectionInput {
            values: &values_nograd,
            returns: &batch.returns,
            rhos: &rhos,
            cs: &cs,
            steps: t,
            batch_size: b,
            num_players: p,
        },
    );

    compose_losses(
        policies,
        values,
        log_selected_t,
        tensor3::<B>(&corrections.advantages, [t, b, p], device),
        tensor3::<B>(&corrections.value_targets, [t, b, p], device),
        tensor3::<B>(&batch.turn_mask, [t, b, p], device),
        tensor3::<B>(&batch.value_mask, [t, b, p], device),
        tensor3::<B>(&batch.progress, [t, b, 1], device),
        config.entropy_coef,
    )
}
