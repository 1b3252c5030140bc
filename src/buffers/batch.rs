//! Fixed-length training windows.
//!
//! A [`Batch`] holds `batch_size` windows of `forward_steps` steps, stored
//! time-major in flat `Vec`s so they can be turned into tensors with a single
//! `from_floats(..).reshape(..)`.
//!
//! Windows shorter than `forward_steps` are right-padded:
//!
//! | field | padding |
//! |---|---|
//! | observation | 0 |
//! | turn mask, value mask | 0 |
//! | action penalty | 1e32 |
//! | action, behavior logits | 0 |
//! | value target | final return |
//! | progress | 1 |

use rand::Rng;
use thiserror::Error;

use crate::core::episode::{Episode, ILLEGAL_ACTION_PENALTY};

#[derive(Debug, Error, PartialEq)]
pub enum BatchError {
    #[error("cannot build a batch from zero episodes")]
    Empty,
    #[error("episode {index}: {field} is {got}, batch expects {expected}")]
    ShapeMismatch {
        index: usize,
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("episode {index}: window start {start} past episode length {len}")]
    StartOutOfRange { index: usize, start: usize, len: usize },
}

/// Time-major batch of training windows.
///
/// Shapes use `T` = steps, `B` = batch size, `P` = players, `Po` = observed
/// players (`P` in full-observation mode, 1 otherwise), `S` = observation
/// size and `A` = number of actions.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub steps: usize,
    pub batch_size: usize,
    pub num_players: usize,
    pub observed_players: usize,
    pub observation_size: usize,
    pub num_actions: usize,
    /// `[T, B, Po, S]`
    pub observations: Vec<f32>,
    /// `[T, B, P]`, one-hot of the turn player, 0 on padding.
    pub turn_mask: Vec<f32>,
    /// `[T, B, A]`, 0 for legal and 1e32 for illegal actions.
    pub action_penalty: Vec<f32>,
    /// `[T, B, P]`
    pub value_mask: Vec<f32>,
    /// `[T, B]`
    pub actions: Vec<i32>,
    /// `[T, B, A]`
    pub behavior_logits: Vec<f32>,
    /// `[T, B, P]`
    pub value_targets: Vec<f32>,
    /// `[B, P]`
    pub returns: Vec<f32>,
    /// `[T, B]`, position of the step within its episode in `[0, 1]`.
    pub progress: Vec<f32>,
}

impl Batch {
    /// `[T, B]` mask that is 1 where some player owns the step.
    pub fn turn_presence(&self) -> Vec<f32> {
        self.turn_mask
            .chunks(self.num_players)
            .map(|players| players.iter().sum())
            .collect()
    }

    /// Number of real (unpadded) turn steps.
    pub fn data_count(&self) -> f32 {
        self.turn_mask.iter().sum()
    }

    pub fn is_full_observation(&self) -> bool {
        self.observed_players == self.num_players
    }
}

/// Number of valid window starts for an episode of `len` steps.
pub fn window_candidates(len: usize, forward_steps: usize) -> usize {
    1 + len.saturating_sub(forward_steps)
}

/// Cut a random window from every episode and assemble them into a batch.
pub fn make_batch<R: Rng + ?Sized>(
    episodes: &[Episode],
    forward_steps: usize,
    full_observation: bool,
    rng: &mut R,
) -> Result<Batch, BatchError> {
    let starts: Vec<usize> = episodes
        .iter()
        .map(|ep| rng.gen_range(0..window_candidates(ep.len(), forward_steps)))
        .collect();
    assemble_batch(episodes, &starts, forward_steps, full_observation)
}

/// Assemble a batch from explicit window starts.
pub fn assemble_batch(
    episodes: &[Episode],
    starts: &[usize],
    forward_steps: usize,
    full_observation: bool,
) -> Result<Batch, BatchError> {
    let first = episodes.first().ok_or(BatchError::Empty)?;
    let p = first.num_players;
    let s = first.observation_size;
    let a = first.num_actions;
    let po = if full_observation { p } else { 1 };
    let b = episodes.len();
    let t_len = forward_steps;

    if starts.len() != b {
        return Err(BatchError::ShapeMismatch {
            index: 0,
            field: "starts",
            expected: b,
            got: starts.len(),
        });
    }

    for (index, ep) in episodes.iter().enumerate() {
        let check = |field: &'static str, got: usize, expected: usize| {
            if got == expected {
                Ok(())
            } else {
                Err(BatchError::ShapeMismatch {
                    index,
                    field,
                    expected,
                    got,
                })
            }
        };
        check("num_players", ep.num_players, p)?;
        check("observation_size", ep.observation_size, s)?;
        check("num_actions", ep.num_actions, a)?;
        if starts[index] > 0 && starts[index] >= ep.len() {
            return Err(BatchError::StartOutOfRange {
                index,
                start: starts[index],
                len: ep.len(),
            });
        }
    }

    let mut batch = Batch {
        steps: t_len,
        batch_size: b,
        num_players: p,
        observed_players: po,
        observation_size: s,
        num_actions: a,
        observations: vec![0.0; t_len * b * po * s],
        turn_mask: vec![0.0; t_len * b * p],
        action_penalty: vec![ILLEGAL_ACTION_PENALTY; t_len * b * a],
        value_mask: vec![0.0; t_len * b * p],
        actions: vec![0; t_len * b],
        behavior_logits: vec![0.0; t_len * b * a],
        value_targets: vec![0.0; t_len * b * p],
        returns: vec![0.0; b * p],
        progress: vec![1.0; t_len * b],
    };

    for (bi, ep) in episodes.iter().enumerate() {
        batch.returns[bi * p..(bi + 1) * p].copy_from_slice(&ep.outcome);

        let start = starts[bi];
        let end = (start + t_len).min(ep.len());
        for t in 0..t_len {
            let tb = t * b + bi;
            let step = start + t;
            if step >= end {
                // Padding: the value target of a missing step is the return.
                batch.value_targets[tb * p..(tb + 1) * p].copy_from_slice(&ep.outcome);
                continue;
            }

            let turn = ep.turns[step];
            let obs_base = tb * po * s;
            if full_observation {
                for player in 0..p {
                    if let Some(obs) = &ep.observations[player][step] {
                        let at = obs_base + player * s;
                        batch.observations[at..at + s].copy_from_slice(obs);
                    }
                }
            } else if let Some(obs) = &ep.observations[turn][step] {
                batch.observations[obs_base..obs_base + s].copy_from_slice(obs);
            }

            batch.turn_mask[tb * p + turn] = 1.0;
            for player in 0..p {
                batch.value_mask[tb * p + player] = if full_observation {
                    1.0
                } else if player == turn {
                    1.0
                } else {
                    0.0
                };
                batch.value_targets[tb * p + player] = ep.values[player][step].unwrap_or(0.0);
            }

            batch.action_penalty[tb * a..(tb + 1) * a].copy_from_slice(&ep.legal_penalty(step));
            batch.actions[tb] = ep.actions[step] as i32;
            batch.behavior_logits[tb * a..(tb + 1) * a].copy_from_slice(&ep.policy_logits[step]);
            batch.progress[tb] = step as f32 / ep.len() as f32;
        }
    }

    Ok(batch)
}
