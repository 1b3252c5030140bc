//! Training configuration.
//!
//! `TrainConfig` is the single configuration record shared by every loop of
//! the system. It is handed to remote workers verbatim during registration,
//! so it is serializable and carries no runtime state.
//!
//! Configuration files are YAML with a `train_args` mapping and an optional
//! `env_args` mapping:
//!
//! ```yaml
//! env_args:
//!   env: tictactoe
//! train_args:
//!   return_mode: TDLAMBDA
//!   batch_size: 32
//!   forward_steps: 8
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Return estimator used to build value targets and advantages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReturnMode {
    /// Monte Carlo: the final return is the target at every step.
    #[serde(rename = "MC")]
    Mc,
    /// One-step V-trace with trace-cut accumulation.
    #[default]
    #[serde(rename = "TD0")]
    Td0,
    /// λ-blended bootstrap from the next value.
    #[serde(rename = "TDLAMBDA")]
    TdLambda,
}

impl ReturnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnMode::Mc => "MC",
            ReturnMode::Td0 => "TD0",
            ReturnMode::TdLambda => "TDLAMBDA",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Configuration for self-play training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Environment registry key.
    pub env: String,
    /// Model registry key (`uniform`, `mlp`, `gru`).
    pub model: String,
    /// Hidden width of the reference models.
    pub hidden_size: usize,
    /// Full-observation mode: every player observes every step.
    pub observation: bool,
    pub return_mode: ReturnMode,
    /// Blending factor for `TDLAMBDA`.
    pub lambda: f32,
    /// Window length of a training sample.
    pub forward_steps: usize,
    /// Episodes per batch.
    pub batch_size: usize,
    pub num_batchers: usize,
    /// Stored episodes required before the first update.
    pub minimum_episodes: usize,
    /// Bound of the episode store.
    pub maximum_episodes: usize,
    /// Generated episodes between two model updates.
    pub update_episodes: usize,
    /// Evaluator/generator split used by the entry service.
    pub eworker_rate: f32,
    /// Sample opponents from past eras instead of the current one.
    pub congress: bool,
    pub entropy_coef: f32,
    pub max_grad_norm: f32,
    /// Learning rate per unit of training data in a batch.
    pub base_learning_rate: f64,
    pub weight_decay: f32,
    pub seed: u64,
    /// Local generator threads started by the runner.
    pub num_generators: usize,
    /// Local evaluator threads started by the runner.
    pub num_evaluators: usize,
    /// Accept remote workers through the entry service.
    pub remote: bool,
    pub entry_port: u16,
    pub server_port: u16,
    /// Directory holding persisted snapshots (`<era>.bin`).
    pub model_dir: PathBuf,
    /// Stop after this many eras (0 = run until shutdown).
    pub max_eras: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            env: "tictactoe".to_string(),
            model: "mlp".to_string(),
            hidden_size: 64,
            observation: false,
            return_mode: ReturnMode::Td0,
            lambda: 0.7,
            forward_steps: 16,
            batch_size: 64,
            num_batchers: 2,
            minimum_episodes: 400,
            maximum_episodes: 100_000,
            update_episodes: 200,
            eworker_rate: 1.0,
            congress: false,
            entropy_coef: 0.3,
            max_grad_norm: 4.0,
            base_learning_rate: 3e-8,
            weight_decay: 1e-5,
            seed: 0,
            num_generators: 2,
            num_evaluators: 1,
            remote: false,
            entry_port: 9999,
            server_port: 9998,
            model_dir: PathBuf::from("models"),
            max_eras: 0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvArgs {
    env: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    env_args: EnvArgs,
    train_args: TrainConfig,
}

impl TrainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(text)?;
        let mut config = file.train_args;
        if let Some(env) = file.env_args.env {
            config.env = env;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forward_steps == 0 {
            return Err(ConfigError::Invalid("forward_steps must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0"));
        }
        if self.num_batchers == 0 {
            return Err(ConfigError::Invalid("num_batchers must be > 0"));
        }
        if self.maximum_episodes == 0 {
            return Err(ConfigError::Invalid("maximum_episodes must be > 0"));
        }
        if self.update_episodes == 0 {
            return Err(ConfigError::Invalid("update_episodes must be > 0"));
        }
        if self.minimum_episodes > self.maximum_episodes {
            return Err(ConfigError::Invalid(
                "minimum_episodes must not exceed maximum_episodes",
            ));
        }
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(ConfigError::Invalid("lambda must be in [0, 1]"));
        }
        if self.eworker_rate < 0.0 {
            return Err(ConfigError::Invalid("eworker_rate must be non-negative"));
        }
        Ok(())
    }

    /// Capacity of the batch queue between batchers and the trainer.
    pub fn batch_queue_capacity(&self) -> usize {
        self.batch_size * 3
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_observation(mut self, observation: bool) -> Self {
        self.observation = observation;
        self
    }

    pub fn with_return_mode(mut self, mode: ReturnMode) -> Self {
        self.return_mode = mode;
        self
    }

    pub fn with_lambda(mut self, lambda: f32) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_forward_steps(mut self, steps: usize) -> Self {
        self.forward_steps = steps;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_num_batchers(mut self, n: usize) -> Self {
        self.num_batchers = n;
        self
    }

    pub fn with_minimum_episodes(mut self, n: usize) -> Self {
        self.minimum_episodes = n;
        self
    }

    pub fn with_maximum_episodes(mut self, n: usize) -> Self {
        self.maximum_episodes = n;
        self
    }

    pub fn with_update_episodes(mut self, n: usize) -> Self {
        self.update_episodes = n;
        self
    }

    pub fn with_eworker_rate(mut self, rate: f32) -> Self {
        self.eworker_rate = rate;
        self
    }

    pub fn with_congress(mut self, congress: bool) -> Self {
        self.congress = congress;
        self
    }

    pub fn with_entropy_coef(mut self, coef: f32) -> Self {
        self.entropy_coef = coef;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_workers(mut self, generators: usize, evaluators: usize) -> Self {
        self.num_generators = generators;
        self.num_evaluators = evaluators;
        self
    }

    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_ports(mut self, entry_port: u16, server_port: u16) -> Self {
        self.entry_port = entry_port;
        self.server_port = server_port;
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    pub fn with_max_eras(mut self, eras: u64) -> Self {
        self.max_eras = eras;
        self
    }
}
