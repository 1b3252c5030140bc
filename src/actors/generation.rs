//! Self-play episode generation.
//!
//! Every seat plays with its own [`InferencePolicy`]; actions are sampled
//! from the softmax of the turn player's logits restricted to legal moves.
//! The recorded logits are the raw behavior logits; the learner applies the
//! episode's legal-action penalty before turning them into probabilities.

use burn::tensor::backend::Backend;

use crate::core::episode::Episode;
use crate::environment::{EnvError, Environment};
use crate::model::{InferencePolicy, PolicyState, PolicyValueModel};

/// Pick an action among `legal`.
///
/// Samples from the softmax of the legal logits, or takes the arg-max when
/// `greedy`. Returns `None` when there is no legal action.
pub fn select_action(
    logits: &[f32],
    legal: &[usize],
    greedy: bool,
    rng: &mut fastrand::Rng,
) -> Option<usize> {
    let logit = |a: usize| logits.get(a).copied().unwrap_or(f32::NEG_INFINITY);
    let max = legal
        .iter()
        .map(|&a| logit(a))
        .fold(f32::NEG_INFINITY, f32::max);
    if greedy || !max.is_finite() {
        return legal
            .iter()
            .copied()
            .max_by(|&x, &y| logit(x).total_cmp(&logit(y)));
    }

    let weights: Vec<f32> = legal.iter().map(|&a| (logit(a) - max).exp()).collect();
    let total: f32 = weights.iter().sum();
    let mut threshold = rng.f32() * total;
    for (&action, &w) in legal.iter().zip(&weights) {
        if threshold < w {
            return Some(action);
        }
        threshold -= w;
    }
    legal.last().copied()
}

/// Play one game and record it.
///
/// With `full_observation` every player observes (and records a value at)
/// every step, otherwise only the turn player does. Returns `None` for a
/// game that ended before its first decision.
pub fn generate<B, M>(
    env: &mut dyn Environment,
    policies: &[InferencePolicy<M>],
    full_observation: bool,
    rng: &mut fastrand::Rng,
    device: &B::Device,
) -> Result<Option<Episode>, EnvError>
where
    B: Backend,
    M: PolicyValueModel<B>,
{
    let num_players = policies.len();
    let num_actions = env.action_length();
    let mut states: Vec<PolicyState<B>> =
        policies.iter().map(|p| p.initial_state(device)).collect();

    let mut episode = Episode {
        num_players,
        observation_size: env.observation_size(),
        num_actions,
        observations: vec![Vec::new(); num_players],
        turns: Vec::new(),
        actions: Vec::new(),
        legal_actions: Vec::new(),
        policy_logits: Vec::new(),
        values: vec![Vec::new(); num_players],
        outcome: Vec::new(),
    };

    env.reset();
    loop {
        env.chance();
        if env.terminal() {
            break;
        }

        let turn = env.turn();
        let mut turn_logits = None;
        for player in 0..num_players {
            if player != turn && !full_observation {
                episode.observations[player].push(None);
                episode.values[player].push(None);
                continue;
            }
            let observation = env.observation(player);
            let state = std::mem::replace(&mut states[player], PolicyState::Stateless);
            let (inference, next) = policies[player].infer(&observation, state, device);
            states[player] = next;

            episode.observations[player].push(Some(observation));
            episode.values[player].push(Some(inference.value));
            if player == turn {
                turn_logits = Some(inference.logits);
            }
        }

        let logits = turn_logits.unwrap_or_else(|| vec![0.0; num_actions]);
        let legal = env.legal_actions();
        let action = select_action(&logits, &legal, false, rng)
            .ok_or(EnvError::IllegalAction { action: num_actions, player: turn })?;
        env.play(action)?;

        episode.turns.push(turn);
        episode.actions.push(action);
        episode.legal_actions.push(legal);
        episode.policy_logits.push(logits);
    }

    if episode.is_empty() {
        return Ok(None);
    }
    episode.outcome = env.outcome();
    Ok(Some(episode))
}
