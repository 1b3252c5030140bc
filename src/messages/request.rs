//! Worker ⇄ coordinator protocol.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use super::payload::Payload;
use crate::core::episode::CompressedEpisode;
use crate::core::model_version::ModelSnapshot;

/// Instructions for one self-play episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationArgs {
    pub episode_id: u64,
    /// Seat whose moves are recorded for training.
    pub player: usize,
    /// Eras playing each seat, indexed by player. More than one era forms a
    /// congress.
    pub model_eras: Vec<Vec<u64>>,
}

/// Instructions for one evaluation game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationArgs {
    pub era: u64,
    pub player: usize,
}

/// Outcome of one evaluation game; `None` when the game was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub era: u64,
    pub outcome: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// One config per `()` item.
    GenerationConfig(Payload<()>),
    EvaluationConfig(Payload<()>),
    /// Finished episodes; `None` entries are dropped.
    EpisodeSubmit(Payload<Option<CompressedEpisode>>),
    ResultSubmit(Payload<EvalReport>),
    /// Snapshots by era.
    ModelFetch(Payload<u64>),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::GenerationConfig(_) => "generation-config",
            Request::EvaluationConfig(_) => "evaluation-config",
            Request::EpisodeSubmit(_) => "episode-submit",
            Request::ResultSubmit(_) => "result-submit",
            Request::ModelFetch(_) => "model-fetch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    GenerationConfig(Payload<GenerationArgs>),
    EvaluationConfig(Payload<EvaluationArgs>),
    Ack(Payload<bool>),
    Model(Payload<ModelSnapshot>),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::GenerationConfig(_) => "generation-config",
            Response::EvaluationConfig(_) => "evaluation-config",
            Response::Ack(_) => "ack",
            Response::Model(_) => "model",
        }
    }
}

/// A request together with the channel its response goes to.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub reply: Sender<Response>,
}
