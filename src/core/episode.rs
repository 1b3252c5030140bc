//! Finished self-play trajectories.
//!
//! An [`Episode`] is produced by a generator worker once a game ends and is
//! never mutated afterwards. It travels and rests as a [`CompressedEpisode`]
//! (bincode + zlib) and is only decompressed when a batcher samples it.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Penalty added to the logits of illegal actions.
pub const ILLEGAL_ACTION_PENALTY: f32 = 1e32;

#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("{field}: expected {expected} entries, got {got}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("turn {turn} at step {step} is not a valid player index")]
    InvalidTurn { step: usize, turn: usize },
    #[error("action {action} at step {step} is out of range")]
    InvalidAction { step: usize, action: usize },
    #[error("episode codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record of one finished trajectory.
///
/// Per-player arrays are indexed `[player][step]`, per-step arrays `[step]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub num_players: usize,
    pub observation_size: usize,
    pub num_actions: usize,
    /// Observation of each player at each step; absent when the player did
    /// not observe that step.
    pub observations: Vec<Vec<Option<Vec<f32>>>>,
    /// Player owning each step.
    pub turns: Vec<usize>,
    /// Action chosen by the turn player.
    pub actions: Vec<usize>,
    /// Legal actions of the turn player.
    pub legal_actions: Vec<Vec<usize>>,
    /// Behavior-policy logits of the turn player.
    pub policy_logits: Vec<Vec<f32>>,
    /// Immediate value target of each player at each step.
    pub values: Vec<Vec<Option<f32>>>,
    /// Final return of each player.
    pub outcome: Vec<f32>,
}

impl Episode {
    /// Number of steps (turns) in the episode.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Check that every per-step array shares the episode's step count.
    pub fn validate(&self) -> Result<(), EpisodeError> {
        let steps = self.len();
        let check = |field: &'static str, got: usize, expected: usize| {
            if got == expected {
                Ok(())
            } else {
                Err(EpisodeError::LengthMismatch {
                    field,
                    expected,
                    got,
                })
            }
        };

        check("actions", self.actions.len(), steps)?;
        check("legal_actions", self.legal_actions.len(), steps)?;
        check("policy_logits", self.policy_logits.len(), steps)?;
        check("observations", self.observations.len(), self.num_players)?;
        check("values", self.values.len(), self.num_players)?;
        check("outcome", self.outcome.len(), self.num_players)?;

        for per_player in &self.observations {
            check("observations[player]", per_player.len(), steps)?;
            for obs in per_player.iter().flatten() {
                check("observation", obs.len(), self.observation_size)?;
            }
        }
        for per_player in &self.values {
            check("values[player]", per_player.len(), steps)?;
        }
        for logits in &self.policy_logits {
            check("policy_logits[step]", logits.len(), self.num_actions)?;
        }
        for (step, &turn) in self.turns.iter().enumerate() {
            if turn >= self.num_players {
                return Err(EpisodeError::InvalidTurn { step, turn });
            }
        }
        for (step, &action) in self.actions.iter().enumerate() {
            if action >= self.num_actions {
                return Err(EpisodeError::InvalidAction { step, action });
            }
        }
        Ok(())
    }

    /// Legal-action penalty mask of a step: 0 for legal, 1e32 for illegal.
    pub fn legal_penalty(&self, step: usize) -> Vec<f32> {
        let mut mask = vec![ILLEGAL_ACTION_PENALTY; self.num_actions];
        for &a in &self.legal_actions[step] {
            if a < self.num_actions {
                mask[a] = 0.0;
            }
        }
        mask
    }

    pub fn compress(&self) -> Result<CompressedEpisode, EpisodeError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        let raw = bincode::serialize(self)?;
        encoder.write_all(&raw)?;
        Ok(CompressedEpisode {
            steps: self.len(),
            num_players: self.num_players,
            bytes: encoder.finish()?,
        })
    }
}

/// Compressed episode as stored in the episode store and sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedEpisode {
    pub steps: usize,
    pub num_players: usize,
    pub bytes: Vec<u8>,
}

impl CompressedEpisode {
    pub fn decompress(&self) -> Result<Episode, EpisodeError> {
        let mut decoder = ZlibDecoder::new(self.bytes.as_slice());
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        let episode: Episode = bincode::deserialize(&raw)?;
        episode.validate()?;
        Ok(episode)
    }
}
