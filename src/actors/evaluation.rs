//! Evaluation games against the uniform baseline.

use burn::tensor::backend::Backend;

use super::generation::select_action;
use crate::environment::{EnvError, Environment};
use crate::model::{InferencePolicy, PolicyState, PolicyValueModel};

/// Play `policy` at seat `player` against uniform-random opponents.
///
/// The evaluated policy acts greedily. Returns the final outcome of
/// `player`.
pub fn evaluate<B, M>(
    env: &mut dyn Environment,
    policy: &InferencePolicy<M>,
    player: usize,
    rng: &mut fastrand::Rng,
    device: &B::Device,
) -> Result<f32, EnvError>
where
    B: Backend,
    M: PolicyValueModel<B>,
{
    let mut state: PolicyState<B> = policy.initial_state(device);
    env.reset();
    loop {
        env.chance();
        if env.terminal() {
            break;
        }
        let turn = env.turn();
        let legal = env.legal_actions();
        let action = if turn == player {
            let observation = env.observation(player);
            let (inference, next) = policy.infer(&observation, state, device);
            state = next;
            select_action(&inference.logits, &legal, true, rng)
        } else {
            (!legal.is_empty()).then(|| legal[rng.usize(..legal.len())])
        };
        let action = action.ok_or(EnvError::IllegalAction {
            action: env.action_length(),
            player: turn,
        })?;
        env.play(action)?;
    }
    Ok(env.outcome().get(player).copied().unwrap_or(0.0))
}
