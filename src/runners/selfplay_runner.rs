//! Single-process self-play runner.
//!
//! Wires every component of a training run together:
//!
//! ```text
//!  ┌────────────┐  envelopes   ┌─────────────────┐  admit   ┌──────────────┐
//!  │  workers   │─────────────▶│   Coordinator   │─────────▶│ EpisodeStore │
//!  │ (local or  │◀─────────────│  (this thread)  │          └──────┬───────┘
//!  │  TCP)      │   replies    └───────┬─────────┘                 │ sample
//!  └────────────┘                      │ update()          ┌───────▼───────┐
//!                                      └──────────────────▶│ Trainer       │
//!                                           snapshot       │ + batchers    │
//!                                                          └───────────────┘
//! ```
//!
//! The coordinator runs on the calling thread. Everything else runs on its
//! own threads and stops on one shared flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use crossbeam_channel::unbounded;
use log::info;
use thiserror::Error;

use crate::actors::{WorkerError, WorkerPool, WorkerStats};
use crate::buffers::episode_store::{EpisodeStore, EpisodeStoreConfig};
use crate::checkpoint::{CheckpointError, Checkpointer, CheckpointerConfig};
use crate::config::{ConfigError, TrainConfig};
use crate::coordinator::{Coordinator, CoordinatorConfig, EntryService};
use crate::core::update_slot::update_slot;
use crate::environment::{make_env, EnvError};
use crate::learner::{create_optimizer, TrainError, Trainer, TrainerConfig};
use crate::metrics::ResultTable;
use crate::model::{
    GruNet, MlpNet, ModelError, ModelKind, ModelSpec, PolicyValueModel, UniformModel,
};
use crate::transport::RequestServer;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub final_era: u64,
    /// Generation configs issued.
    pub episodes: u64,
    /// Evaluation configs issued.
    pub evaluations: u64,
    pub stored_episodes: usize,
    pub train_steps: usize,
    pub results: ResultTable,
    pub workers: Vec<WorkerStats>,
}

pub struct SelfPlayRunner<B: AutodiffBackend> {
    config: TrainConfig,
    device: B::Device,
    shutdown: Arc<AtomicBool>,
}

impl<B: AutodiffBackend> SelfPlayRunner<B> {
    pub fn new(config: TrainConfig, device: B::Device) -> Result<Self, RunnerError> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Raising this flag stops the run at the next poll of every loop.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Train model `M` until `max_eras` eras are published or the shutdown
    /// flag is raised.
    pub fn run<M>(&self) -> Result<RunSummary, RunnerError>
    where
        M: PolicyValueModel<B> + AutodiffModule<B>,
        M::InnerModule: PolicyValueModel<B::InnerBackend>,
    {
        let config = &self.config;
        let env = make_env(&config.env)?;
        let spec = ModelSpec::new(env.observation_size(), env.action_length(), config.hidden_size);
        let num_players = env.players().len();
        info!(
            "self-play: env {} ({} players), model {}, {} return",
            config.env,
            num_players,
            config.model,
            config.return_mode.as_str()
        );

        let store = Arc::new(EpisodeStore::new(EpisodeStoreConfig::new(
            config.minimum_episodes,
            config.maximum_episodes,
        )));
        let checkpointer = Checkpointer::new(CheckpointerConfig::new(&config.model_dir))?;

        let trainer_config = TrainerConfig::from_train_config(config);
        let optimizer = create_optimizer::<B, M>(&trainer_config);
        let trainer = Trainer::new(
            trainer_config,
            M::init(&spec, &self.device),
            optimizer,
            Arc::clone(&store),
            update_slot(),
            Arc::clone(&self.shutdown),
            self.device.clone(),
        )
        .spawn()?;

        // Workers and model validation run without autodiff.
        let inner_device = <B::InnerBackend as Backend>::Device::default();
        let (tx, rx) = unbounded();
        let mut coordinator = Coordinator::<B::InnerBackend, M::InnerModule>::new(
            CoordinatorConfig::from_train_config(config, num_players),
            rx,
            Arc::clone(&store),
            Box::new(trainer.requester()),
            checkpointer,
            spec,
            inner_device.clone(),
            Arc::clone(&self.shutdown),
        );

        let mut services = None;
        if config.remote {
            let server = RequestServer::bind(
                ("0.0.0.0", config.server_port),
                tx.clone(),
                Arc::clone(&self.shutdown),
            )?;
            let entry = EntryService::bind(
                ("0.0.0.0", config.entry_port),
                config.clone(),
                Arc::clone(&self.shutdown),
            )?;
            services = Some((server, entry));
        }

        let pool = WorkerPool::spawn_local::<B::InnerBackend, M::InnerModule>(
            config,
            tx,
            inner_device,
            Arc::clone(&self.shutdown),
        )?;

        coordinator.serve();
        self.shutdown.store(true, Ordering::Relaxed);

        let final_era = coordinator.era();
        let episodes = coordinator.num_episodes();
        let evaluations = coordinator.num_results();
        let results = coordinator.results().clone();
        // Pending envelopes are dropped with the coordinator, which fails
        // the calls of workers still waiting for a reply.
        drop(coordinator);

        let workers = pool.join_all(&self.shutdown);
        if let Some((mut server, mut entry)) = services {
            server.stop();
            entry.stop();
        }
        let train_steps = trainer.train_steps();
        trainer.join();

        info!(
            "finished at era {} after {} episodes ({} stored, {} train steps)",
            final_era,
            episodes,
            store.len(),
            train_steps
        );
        Ok(RunSummary {
            final_era,
            episodes,
            evaluations,
            stored_episodes: store.len(),
            train_steps,
            results,
            workers,
        })
    }
}

/// Resolve the model registry key and run the matching instantiation.
pub fn launch<B: AutodiffBackend>(
    config: TrainConfig,
    device: B::Device,
) -> Result<RunSummary, RunnerError> {
    let kind: ModelKind = config.model.parse()?;
    let runner = SelfPlayRunner::<B>::new(config, device)?;
    match kind {
        ModelKind::Uniform => runner.run::<UniformModel<B>>(),
        ModelKind::Mlp => runner.run::<MlpNet<B>>(),
        ModelKind::Gru => runner.run::<GruNet<B>>(),
    }
}
