//! Worker loop shared by local and remote workers.
//!
//! A worker owns one environment and one [`Client`]. Generators play
//! self-play episodes with the eras named in their generation config;
//! evaluators play the current era against the uniform baseline. Decoded
//! snapshots are cached by era, so a worker only fetches each era once.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::record::RecorderError;
use burn::tensor::backend::Backend;
use log::{debug, info, warn};
use thiserror::Error;

use super::evaluation::evaluate;
use super::generation::generate;
use crate::config::TrainConfig;
use crate::core::episode::EpisodeError;
use crate::environment::{make_env, EnvError, Environment};
use crate::messages::EvalReport;
use crate::model::{InferencePolicy, ModelError, ModelSpec, PolicyValueModel};
use crate::transport::{Client, TransportError};

/// Decoded eras kept per worker.
const MODEL_CACHE: usize = 32;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("environment error: {0}")]
    Env(#[from] EnvError),
    #[error("episode error: {0}")]
    Episode(#[from] EpisodeError),
    #[error("cannot decode model: {0}")]
    Model(#[from] RecorderError),
    #[error(transparent)]
    UnknownModel(#[from] ModelError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Generator,
    Evaluator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Generator => write!(f, "generator"),
            Role::Evaluator => write!(f, "evaluator"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: usize,
    pub role: Role,
    pub env: String,
    pub full_observation: bool,
    pub hidden_size: usize,
    pub seed: u64,
}

impl WorkerConfig {
    pub fn from_train_config(id: usize, role: Role, config: &TrainConfig) -> Self {
        Self {
            id,
            role,
            env: config.env.clone(),
            full_observation: config.observation,
            hidden_size: config.hidden_size,
            seed: config.seed,
        }
    }

    pub fn name(&self) -> String {
        format!("{}-{}", self.role, self.id)
    }
}

/// Episodes and results a worker submitted before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub id: usize,
    pub episodes: usize,
    pub null_episodes: usize,
    pub results: usize,
}

/// Era-keyed cache of decoded policies.
pub struct ModelCache<B: Backend, M> {
    spec: ModelSpec,
    device: B::Device,
    policies: BTreeMap<u64, InferencePolicy<M>>,
}

impl<B, M> ModelCache<B, M>
where
    B: Backend,
    M: PolicyValueModel<B>,
{
    pub fn new(spec: ModelSpec, device: B::Device) -> Self {
        Self {
            spec,
            device,
            policies: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policy of one era, fetched through `client` on a miss.
    ///
    /// A reply carrying a different era (the coordinator's fallback) is used
    /// but not cached under the requested era.
    pub fn policy(
        &mut self,
        era: u64,
        client: &mut dyn Client,
    ) -> Result<InferencePolicy<M>, WorkerError> {
        if let Some(policy) = self.policies.get(&era) {
            return Ok(policy.clone());
        }
        let snapshot = client.fetch_model(era)?;
        let policy = InferencePolicy::from_snapshot::<B>(&snapshot, &self.spec, &self.device)?;
        if snapshot.era == era {
            self.policies.insert(era, policy.clone());
            while self.policies.len() > MODEL_CACHE {
                self.policies.pop_first();
            }
        } else {
            debug!("asked for era {}, served era {}", era, snapshot.era);
        }
        Ok(policy)
    }

    /// One policy per seat: a single era plays alone, several form a
    /// congress.
    pub fn seat_policies(
        &mut self,
        model_eras: &[Vec<u64>],
        client: &mut dyn Client,
    ) -> Result<Vec<InferencePolicy<M>>, WorkerError> {
        model_eras
            .iter()
            .map(|eras| {
                let mut members = eras
                    .iter()
                    .map(|&era| self.policy(era, client))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match members.len() {
                    0 => InferencePolicy::Uniform {
                        num_actions: self.spec.num_actions,
                    },
                    1 => members.remove(0),
                    _ => InferencePolicy::Congress(members),
                })
            })
            .collect()
    }
}

pub struct Worker<B: Backend, M, C> {
    config: WorkerConfig,
    client: C,
    env: Box<dyn Environment>,
    cache: ModelCache<B, M>,
    rng: fastrand::Rng,
    device: B::Device,
    shutdown: Arc<AtomicBool>,
    stats: WorkerStats,
    _model: PhantomData<M>,
}

impl<B, M, C> Worker<B, M, C>
where
    B: Backend,
    M: PolicyValueModel<B>,
    C: Client,
{
    pub fn new(
        config: WorkerConfig,
        client: C,
        device: B::Device,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, WorkerError> {
        let env = make_env(&config.env)?;
        let spec = ModelSpec::new(env.observation_size(), env.action_length(), config.hidden_size);
        let seed = config.seed.wrapping_mul(0x9E37_79B9).wrapping_add(config.id as u64);
        Ok(Self {
            stats: WorkerStats {
                id: config.id,
                ..Default::default()
            },
            config,
            client,
            env,
            cache: ModelCache::new(spec, device.clone()),
            rng: fastrand::Rng::with_seed(seed),
            device,
            shutdown,
            _model: PhantomData,
        })
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Work until shutdown or until the coordinator goes away.
    pub fn run(mut self) -> WorkerStats {
        info!("started {}", self.config.name());
        while !self.shutdown.load(Ordering::Relaxed) {
            let step = match self.config.role {
                Role::Generator => self.generation_step(),
                Role::Evaluator => self.evaluation_step(),
            };
            match step {
                Ok(()) => {}
                Err(WorkerError::Transport(TransportError::Disconnected)) => {
                    debug!("{}: coordinator disconnected", self.config.name());
                    break;
                }
                Err(e) => {
                    warn!("{} stopped: {}", self.config.name(), e);
                    break;
                }
            }
        }
        info!(
            "finished {} ({} episodes, {} results)",
            self.config.name(),
            self.stats.episodes,
            self.stats.results
        );
        self.stats
    }

    pub fn generation_step(&mut self) -> Result<(), WorkerError> {
        let args = self.client.generation_config()?;
        let policies = self.cache.seat_policies(&args.model_eras, &mut self.client)?;
        let episode = match generate::<B, M>(
            self.env.as_mut(),
            &policies,
            self.config.full_observation,
            &mut self.rng,
            &self.device,
        ) {
            Ok(Some(episode)) => Some(episode.compress()?),
            Ok(None) => None,
            Err(e) => {
                warn!("episode {} aborted: {}", args.episode_id, e);
                None
            }
        };
        let null = episode.is_none();
        self.client.submit_episode(episode)?;
        if null {
            self.stats.null_episodes += 1;
        } else {
            self.stats.episodes += 1;
        }
        Ok(())
    }

    pub fn evaluation_step(&mut self) -> Result<(), WorkerError> {
        let args = self.client.evaluation_config()?;
        let policy = self.cache.policy(args.era, &mut self.client)?;
        let outcome = match evaluate::<B, M>(
            self.env.as_mut(),
            &policy,
            args.player,
            &mut self.rng,
            &self.device,
        ) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("evaluation of era {} aborted: {}", args.era, e);
                None
            }
        };
        self.client.submit_result(EvalReport {
            era: args.era,
            outcome,
        })?;
        self.stats.results += 1;
        Ok(())
    }
}
