//! Asynchronous training loop.
//!
//! The trainer owns the live parameters on its own thread. It waits until
//! the episode store holds `minimum_episodes`, starts the batchers, and then
//! trains batch after batch until the coordinator raises a snapshot request
//! through the [`UpdateSlot`](crate::core::update_slot::UpdateSlot). The
//! parameters are then recorded into bytes, the learning rate is adapted to
//! the observed data volume, and the snapshot is reported back.
//!
//! ```text
//!            ┌──────┐  store ready  ┌─────────┐  batcher up  ┌──────────┐
//!  spawn ──► │ Idle │ ────────────► │ Waiting │ ───────────► │ Training │ ◄─┐
//!            └──────┘               └─────────┘              └────┬─────┘   │
//!                                                   request       │         │
//!                                                                 ▼         │
//!                                                          ┌──────────────┐ │
//!                                                          │ Snapshotting │─┘
//!                                                          └──────────────┘
//!  shutdown from any phase ──► Stopped
//! ```
//!
//! # Model Handoff
//!
//! Snapshots carry the record of the inference module (`model.valid()`), so
//! workers decode them on the inner backend without autodiff graphs.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::{AutodiffModule, Module};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::RecorderError;
use burn::tensor::backend::AutodiffBackend;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::algorithms::loss::{vtrace_loss, LossConfig};
use crate::algorithms::vtrace::CorrectionArena;
use crate::buffers::batcher::{Batcher, BatcherConfig};
use crate::buffers::episode_store::EpisodeStore;
use crate::config::TrainConfig;
use crate::core::model_version::ModelSnapshot;
use crate::core::update_slot::SharedUpdateSlot;
use crate::model::{encode_params, PolicyValueModel};
use crate::scheduling::{DataVolumeLR, LRScheduler};

/// Interval at which waiting loops re-check shutdown and requests.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Consecutive non-finite batches after which the parameters are treated as
/// diverged.
pub const MAX_NONFINITE_BATCHES: usize = 16;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to record parameters: {0}")]
    Record(#[from] RecorderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerPhase {
    Idle,
    Waiting,
    Training,
    Snapshotting,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub minimum_episodes: usize,
    pub base_learning_rate: f64,
    pub weight_decay: f32,
    pub max_grad_norm: f32,
    pub max_nonfinite_batches: usize,
    pub loss: LossConfig,
    pub batcher: BatcherConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self::from_train_config(&TrainConfig::default())
    }
}

impl TrainerConfig {
    pub fn from_train_config(config: &TrainConfig) -> Self {
        Self {
            minimum_episodes: config.minimum_episodes,
            base_learning_rate: config.base_learning_rate,
            weight_decay: config.weight_decay,
            max_grad_norm: config.max_grad_norm,
            max_nonfinite_batches: MAX_NONFINITE_BATCHES,
            loss: LossConfig::from_train_config(config),
            batcher: BatcherConfig::from_train_config(config),
        }
    }

    /// Seed of the data-volume average: one full batch of real steps.
    pub fn initial_data_count(&self) -> f64 {
        (self.batcher.batch_size * self.batcher.forward_steps) as f64
    }
}

/// Adam with weight decay and gradient norm clipping.
///
/// burn clips the norm of each parameter tensor separately, so
/// `max_grad_norm` bounds every tensor's gradient rather than their joint
/// norm.
pub fn create_optimizer<B, M>(config: &TrainerConfig) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut adam_config = AdamConfig::new().with_epsilon(1e-5);
    if config.weight_decay > 0.0 {
        adam_config = adam_config.with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay)));
    }
    if config.max_grad_norm > 0.0 {
        adam_config =
            adam_config.with_grad_clipping(Some(GradientClippingConfig::Norm(config.max_grad_norm)));
    }
    adam_config.init()
}

/// Loss sums accumulated between two snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochStats {
    pub batches: usize,
    pub data_count: f64,
    pub policy: f64,
    pub value: f64,
    pub entropy: f64,
}

impl EpochStats {
    pub(crate) fn record(&mut self, policy: f32, value: f32, entropy: f32, data_count: f32) {
        self.batches += 1;
        self.data_count += data_count as f64;
        self.policy += policy as f64;
        self.value += value as f64;
        self.entropy += entropy as f64;
    }

    /// Per-step means: (policy, value, entropy).
    pub fn means(&self) -> (f64, f64, f64) {
        let n = self.data_count.max(1.0);
        (self.policy / n, self.value / n, self.entropy / n)
    }
}

/// State visible outside the trainer thread.
#[derive(Debug)]
struct TrainerShared {
    phase: Mutex<TrainerPhase>,
    train_steps: AtomicUsize,
    epochs: AtomicU64,
}

impl TrainerShared {
    fn set_phase(&self, phase: TrainerPhase) {
        *self.phase.lock() = phase;
    }
}

pub struct Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: PolicyValueModel<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    config: TrainerConfig,
    model: M,
    optimizer: O,
    store: Arc<EpisodeStore>,
    slot: SharedUpdateSlot<ModelSnapshot>,
    shutdown: Arc<AtomicBool>,
    scheduler: DataVolumeLR,
    arena: CorrectionArena,
    shared: Arc<TrainerShared>,
    device: B::Device,
}

impl<B, M, O> Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: PolicyValueModel<B> + AutodiffModule<B>,
    M::InnerModule: PolicyValueModel<B::InnerBackend>,
    O: Optimizer<M, B> + Send + 'static,
{
    pub fn new(
        config: TrainerConfig,
        model: M,
        optimizer: O,
        store: Arc<EpisodeStore>,
        slot: SharedUpdateSlot<ModelSnapshot>,
        shutdown: Arc<AtomicBool>,
        device: B::Device,
    ) -> Self {
        let scheduler = DataVolumeLR::new(config.base_learning_rate, config.initial_data_count());
        let arena = CorrectionArena::new(config.batcher.forward_steps);
        Self {
            config,
            model,
            optimizer,
            store,
            slot,
            shutdown,
            scheduler,
            arena,
            shared: Arc::new(TrainerShared {
                phase: Mutex::new(TrainerPhase::Idle),
                train_steps: AtomicUsize::new(0),
                epochs: AtomicU64::new(0),
            }),
            device,
        }
    }

    /// Move the trainer onto its own thread.
    pub fn spawn(self) -> Result<TrainerHandle<M>, TrainError> {
        let slot = Arc::clone(&self.slot);
        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let shared = Arc::clone(&self.shared);
        let thread = std::thread::Builder::new()
            .name("Trainer".to_string())
            .spawn(move || self.run())?;
        Ok(TrainerHandle {
            slot,
            store,
            shutdown,
            shared,
            thread: Some(thread),
        })
    }

    /// Run until shutdown; returns the trained model.
    pub fn run(mut self) -> M {
        info!(
            "trainer started: {} parameters, return mode {}",
            self.model.num_params(),
            self.config.loss.return_mode.as_str()
        );

        if self.model.num_params() == 0 {
            self.serve_without_training();
        } else {
            self.train();
        }

        self.slot.close();
        self.shared.set_phase(TrainerPhase::Stopped);
        info!(
            "trainer stopped after {} steps",
            self.shared.train_steps.load(Ordering::Relaxed)
        );
        self.model
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// A model without parameters has nothing to train or record; requests
    /// are answered with baseline snapshots so eras keep advancing.
    fn serve_without_training(&mut self) {
        self.shared.set_phase(TrainerPhase::Waiting);
        while !self.is_shutdown() {
            if self.slot.wait_for_request(POLL_INTERVAL) {
                self.shared.set_phase(TrainerPhase::Snapshotting);
                let epoch = self.shared.epochs.fetch_add(1, Ordering::Relaxed) + 1;
                self.slot.report(ModelSnapshot::baseline(epoch));
                self.shared.set_phase(TrainerPhase::Waiting);
            }
        }
    }

    fn train(&mut self) {
        self.shared.set_phase(TrainerPhase::Waiting);
        while !self.store.is_ready() {
            if self.is_shutdown() {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let mut batcher = Batcher::new(self.config.batcher.clone(), Arc::clone(&self.store));
        if let Err(e) = batcher.start().map_err(TrainError::from) {
            error!("trainer cannot start: {}", e);
            return;
        }
        self.shared.set_phase(TrainerPhase::Training);

        let mut nonfinite = 0;
        'outer: loop {
            let mut epoch = EpochStats::default();

            while epoch.batches == 0 || !self.slot.is_requested() {
                if self.is_shutdown() {
                    break 'outer;
                }
                let Some(batch) = batcher.recv_timeout(POLL_INTERVAL) else {
                    continue;
                };

                let out = vtrace_loss(
                    &self.model,
                    &batch,
                    &self.config.loss,
                    &mut self.arena,
                    &self.device,
                );
                if !out.policy.is_finite() || !out.value.is_finite() {
                    nonfinite += 1;
                    warn!(
                        "skipping batch with non-finite loss (policy {}, value {})",
                        out.policy, out.value
                    );
                    if nonfinite >= self.config.max_nonfinite_batches {
                        // Closing the slot answers pending and later
                        // requests with "no update".
                        error!("trainer stopping: {} non-finite batches in a row", nonfinite);
                        break 'outer;
                    }
                    continue;
                }
                nonfinite = 0;
                epoch.record(out.policy, out.value, out.entropy, out.data_count);

                let steps = self.shared.train_steps.load(Ordering::Relaxed);
                let lr = self.scheduler.get_lr(steps);
                let grads = out.total.backward();
                let grads = GradientsParams::from_grads(grads, &self.model);
                self.model = self.optimizer.step(lr, self.model.clone(), grads);
                self.shared.train_steps.fetch_add(1, Ordering::Relaxed);
            }

            self.shared.set_phase(TrainerPhase::Snapshotting);
            let (policy, value, entropy) = epoch.means();
            info!(
                "loss = p:{:.3} v:{:.3} ent:{:.3} total:{:.3} ({} batches, {} steps)",
                policy,
                value,
                entropy,
                policy + value - entropy * self.config.loss.entropy_coef as f64,
                epoch.batches,
                epoch.data_count
            );
            self.scheduler.observe(epoch.data_count, epoch.batches);
            debug!(
                "data count ema {:.1}, next lr {:.3e}",
                self.scheduler.data_count_ema(),
                self.scheduler
                    .get_lr(self.shared.train_steps.load(Ordering::Relaxed))
            );

            match self.snapshot() {
                Ok(snapshot) => self.slot.report(snapshot),
                Err(e) => {
                    // Closing the slot turns the pending request into "no update".
                    error!("trainer stopping: {}", e);
                    break;
                }
            }
            self.shared.set_phase(TrainerPhase::Training);
        }

        batcher.stop();
    }

    fn snapshot(&self) -> Result<ModelSnapshot, TrainError> {
        let epoch = self.shared.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = encode_params::<B::InnerBackend, _>(&self.model.valid())?;
        Ok(ModelSnapshot::new(epoch, bytes))
    }
}

/// Control side of a spawned trainer.
pub struct TrainerHandle<M> {
    slot: SharedUpdateSlot<ModelSnapshot>,
    store: Arc<EpisodeStore>,
    shutdown: Arc<AtomicBool>,
    shared: Arc<TrainerShared>,
    thread: Option<JoinHandle<M>>,
}

impl<M> TrainerHandle<M> {
    /// Request a snapshot and block until the trainer reports it.
    ///
    /// Returns `None` while the store holds fewer than `minimum_episodes`
    /// episodes, and on shutdown.
    pub fn update(&self) -> Option<ModelSnapshot> {
        self.requester().update()
    }

    /// Update requests without ownership of the trainer thread.
    pub fn requester(&self) -> UpdateRequester {
        UpdateRequester {
            slot: Arc::clone(&self.slot),
            store: Arc::clone(&self.store),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn phase(&self) -> TrainerPhase {
        *self.shared.phase.lock()
    }

    pub fn train_steps(&self) -> usize {
        self.shared.train_steps.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Wait for the trainer thread; the shared shutdown flag must already be
    /// raised.
    pub fn join(mut self) -> Option<M> {
        self.slot.close();
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(model) => Some(model),
            Err(_) => {
                error!("trainer thread panicked");
                None
            }
        }
    }
}

/// Requests snapshots from a running trainer.
#[derive(Clone)]
pub struct UpdateRequester {
    slot: SharedUpdateSlot<ModelSnapshot>,
    store: Arc<EpisodeStore>,
    shutdown: Arc<AtomicBool>,
}

impl UpdateRequester {
    /// See [`TrainerHandle::update`].
    pub fn update(&self) -> Option<ModelSnapshot> {
        if !self.store.is_ready() {
            return None;
        }
        self.slot.request_and_wait(&self.shutdown, POLL_INTERVAL)
    }
}
