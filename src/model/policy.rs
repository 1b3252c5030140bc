//! Inference-side policies used by workers.
//!
//! A worker plays with one of three kinds of policy: the parameter-free
//! uniform baseline (era 0), a decoded model snapshot, or a congress of
//! snapshots whose action probabilities are averaged.

use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn::record::RecorderError;

use super::{decode_params, to_host, Hidden, ModelSpec, PolicyValueModel};
use crate::core::model_version::ModelSnapshot;

/// Floor added before taking the log of averaged probabilities.
const CONGRESS_EPS: f32 = 1e-8;

/// Per-game recurrent state of a policy.
#[derive(Debug, Clone)]
pub enum PolicyState<B: Backend> {
    Stateless,
    Hidden(Hidden<B>),
    Congress(Vec<PolicyState<B>>),
}

/// Result of a single-observation inference.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    /// Unnormalized logits over the full action space.
    pub logits: Vec<f32>,
    pub value: f32,
}

#[derive(Debug, Clone)]
pub enum InferencePolicy<M> {
    Uniform { num_actions: usize },
    Model(M),
    Congress(Vec<InferencePolicy<M>>),
}

impl<M> InferencePolicy<M> {
    /// Decode a snapshot; the baseline snapshot yields the uniform policy.
    pub fn from_snapshot<B>(
        snapshot: &ModelSnapshot,
        spec: &ModelSpec,
        device: &B::Device,
    ) -> Result<Self, RecorderError>
    where
        B: Backend,
        M: PolicyValueModel<B>,
    {
        match &snapshot.params {
            None => Ok(InferencePolicy::Uniform {
                num_actions: spec.num_actions,
            }),
            Some(bytes) => Ok(InferencePolicy::Model(decode_params::<B, M>(
                bytes, spec, device,
            )?)),
        }
    }

    /// Fresh per-game state.
    pub fn initial_state<B>(&self, device: &B::Device) -> PolicyState<B>
    where
        B: Backend,
        M: PolicyValueModel<B>,
    {
        match self {
            InferencePolicy::Uniform { .. } => PolicyState::Stateless,
            InferencePolicy::Model(model) => match model.init_hidden(1, device) {
                Some(hidden) => PolicyState::Hidden(hidden),
                None => PolicyState::Stateless,
            },
            InferencePolicy::Congress(members) => {
                PolicyState::Congress(members.iter().map(|m| m.initial_state(device)).collect())
            }
        }
    }

    /// Run one observation through the policy, returning the inference and
    /// the advanced state.
    pub fn infer<B>(
        &self,
        observation: &[f32],
        state: PolicyState<B>,
        device: &B::Device,
    ) -> (Inference, PolicyState<B>)
    where
        B: Backend,
        M: PolicyValueModel<B>,
    {
        match self {
            InferencePolicy::Uniform { num_actions } => (
                Inference {
                    logits: vec![0.0; *num_actions],
                    value: 0.0,
                },
                PolicyState::Stateless,
            ),
            InferencePolicy::Model(model) => {
                let hidden = match state {
                    PolicyState::Hidden(h) => Some(h),
                    _ => None,
                };
                let obs = Tensor::<B, 1>::from_floats(observation, device)
                    .reshape([1, observation.len()]);
                let out = model.forward(obs, hidden);
                let value = to_host(out.value).first().copied().unwrap_or(0.0);
                let next = match out.hidden {
                    Some(h) => PolicyState::Hidden(h),
                    None => PolicyState::Stateless,
                };
                (
                    Inference {
                        logits: to_host(out.policy),
                        value,
                    },
                    next,
                )
            }
            InferencePolicy::Congress(members) => {
                let states = match state {
                    PolicyState::Congress(states) if states.len() == members.len() => states,
                    _ => members.iter().map(|m| m.initial_state(device)).collect(),
                };

                let mut mean_probs: Vec<f32> = Vec::new();
                let mut mean_value = 0.0f32;
                let mut next_states = Vec::with_capacity(members.len());
                for (member, member_state) in members.iter().zip(states) {
                    let (inference, next) = member.infer(observation, member_state, device);
                    let probs = to_host(softmax(
                        Tensor::<B, 1>::from_floats(inference.logits.as_slice(), device),
                        0,
                    ));
                    if mean_probs.is_empty() {
                        mean_probs = vec![0.0; probs.len()];
                    }
                    for (acc, p) in mean_probs.iter_mut().zip(&probs) {
                        *acc += p;
                    }
                    mean_value += inference.value;
                    next_states.push(next);
                }

                let n = members.len().max(1) as f32;
                let logits = mean_probs
                    .iter()
                    .map(|p| (p / n + CONGRESS_EPS).ln())
                    .collect();
                (
                    Inference {
                        logits,
                        value: mean_value / n,
                    },
                    PolicyState::Congress(next_states),
                )
            }
        }
    }
}
