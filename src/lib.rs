//! # selfplay_rl: distributed self-play with V-trace correction
//!
//! Actor/learner training for turn-based games. Workers play self-play
//! episodes with published model eras, a central coordinator collects them
//! into a bounded episode store, and a trainer thread learns off-policy from
//! sampled windows using V-trace corrected targets.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Generators / Evaluators (threads, or remote hosts over TCP)         │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐                          │
//! │  │ worker 0 │   │ worker 1 │   │ worker N │                          │
//! │  └────┬─────┘   └────┬─────┘   └────┬─────┘                          │
//! │       └──────────────┼──────────────┘                                │
//! │                      ▼ Envelope { request, reply }                   │
//! │            ┌───────────────────┐        ┌──────────────┐             │
//! │            │   Coordinator     │───────▶│ models/N.bin │             │
//! │            │ configs, results, │        └──────────────┘             │
//! │            │ eras, model fetch │                                     │
//! │            └───┬───────────▲───┘                                     │
//! │          admit │           │ snapshot (UpdateSlot)                   │
//! │                ▼           │                                         │
//! │      ┌──────────────┐   ┌──┴──────────────────┐                      │
//! │      │ EpisodeStore │──▶│ Batchers → Trainer  │                      │
//! │      │ (recency)    │   │ V-trace (MC/TD0/TDλ)│                      │
//! │      └──────────────┘   └─────────────────────┘                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use burn::backend::{Autodiff, NdArray};
//! use selfplay_rl::{launch, TrainConfig};
//!
//! let config = TrainConfig::load("config.yaml")?;
//! let summary = launch::<Autodiff<NdArray>>(config, Default::default())?;
//! println!("stopped at era {}", summary.final_era);
//! ```

pub mod actors;
pub mod algorithms;
pub mod buffers;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod environment;
pub mod learner;
pub mod messages;
pub mod metrics;
pub mod model;
pub mod runners;
pub mod scheduling;
pub mod transport;

pub use config::{ConfigError, ReturnMode, TrainConfig};

pub use core::episode::{CompressedEpisode, Episode, EpisodeError};
pub use core::model_version::{era_counter, EraCounter, ModelSnapshot, SharedEraCounter};
pub use core::update_slot::{update_slot, SharedUpdateSlot, UpdateSlot};

pub use buffers::{Batch, Batcher, BatcherConfig, EpisodeStore, EpisodeStoreConfig};

pub use learner::{Trainer, TrainerConfig, TrainerHandle};

pub use coordinator::{Coordinator, CoordinatorConfig, EntryService, SnapshotSource};

pub use actors::{join_remote, Role, Worker, WorkerPool};

pub use messages::{Envelope, Payload, Request, Response};
pub use transport::{Client, LocalClient, RequestServer, TcpClient, TransportError};

pub use model::{InferencePolicy, ModelKind, ModelSpec, PolicyValueModel};
pub use environment::{make_env, Environment};

pub use runners::{launch, RunSummary, RunnerError, SelfPlayRunner};
