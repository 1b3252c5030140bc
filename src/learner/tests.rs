//! Trainer lifecycle tests on the NdArray backend.

use super::*;
use crate::buffers::episode_store::{EpisodeStore, EpisodeStoreConfig};
use crate::core::episode::tests::sample_episode;
use crate::core::update_slot::update_slot;
use crate::model::{
    decode_params, Hidden, MlpNet, ModelOutput, ModelSpec, PolicyValueModel, UniformModel,
};
use burn::backend::{Autodiff, NdArray};
use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type B = NdArray<f32>;
type AB = Autodiff<NdArray<f32>>;

fn spec() -> ModelSpec {
    ModelSpec::new(3, 4, 8)
}

fn small_config(minimum_episodes: usize) -> TrainerConfig {
    let mut config = TrainerConfig::default();
    config.minimum_episodes = minimum_episodes;
    config.batcher.num_batchers = 1;
    config.batcher.batch_size = 2;
    config.batcher.forward_steps = 4;
    config.batcher.queue_capacity = 6;
    config.base_learning_rate = 1e-4;
    config
}

fn filled_store(minimum: usize, count: usize) -> Arc<EpisodeStore> {
    let store = Arc::new(EpisodeStore::new(EpisodeStoreConfig::new(minimum, 100)));
    for i in 0..count {
        store.admit(sample_episode(3 + i % 4).compress().unwrap());
    }
    store
}

fn spawn_trainer<M>(
    config: TrainerConfig,
    model: M,
    store: Arc<EpisodeStore>,
    shutdown: Arc<AtomicBool>,
) -> TrainerHandle<M>
where
    M: PolicyValueModel<AB> + burn::module::AutodiffModule<AB>,
    M::InnerModule: PolicyValueModel<B>,
{
    let optimizer = create_optimizer::<AB, M>(&config);
    Trainer::new(
        config,
        model,
        optimizer,
        store,
        update_slot(),
        shutdown,
        Default::default(),
    )
    .spawn()
    .unwrap()
}

/// MLP whose value head has diverged to NaN.
#[derive(Module, Debug)]
struct DivergedNet<B: Backend> {
    inner: MlpNet<B>,
}

impl<B: Backend> PolicyValueModel<B> for DivergedNet<B> {
    fn init(spec: &ModelSpec, device: &B::Device) -> Self {
        Self {
            inner: MlpNet::init(spec, device),
        }
    }

    fn forward(&self, obs: Tensor<B, 2>, hidden: Option<Hidden<B>>) -> ModelOutput<B> {
        let out = self.inner.forward(obs, hidden);
        ModelOutput {
            value: out.value.mul_scalar(f32::NAN),
            ..out
        }
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn test_config_from_train_config() {
    let train = crate::config::TrainConfig::default()
        .with_batch_size(8)
        .with_forward_steps(5)
        .with_minimum_episodes(10);
    let config = TrainerConfig::from_train_config(&train);
    assert_eq!(config.minimum_episodes, 10);
    assert_eq!(config.batcher.queue_capacity, 24);
    assert_eq!(config.initial_data_count(), 40.0);
    assert_eq!(config.max_grad_norm, 4.0);
    assert_eq!(config.max_nonfinite_batches, MAX_NONFINITE_BATCHES);
}

#[test]
fn test_optimizer_step_changes_parameters() {
    use crate::algorithms::loss::{vtrace_loss, LossConfig};
    use crate::algorithms::vtrace::CorrectionArena;
    use crate::buffers::batch::assemble_batch;
    use burn::optim::{GradientsParams, Optimizer};

    let device = Default::default();
    let config = small_config(1);
    let model = MlpNet::<AB>::init(&spec(), &device);
    let before = crate::model::encode_params::<AB, _>(&model).unwrap();
    let mut optimizer = create_optimizer::<AB, MlpNet<AB>>(&config);

    let batch = assemble_batch(&[sample_episode(4)], &[0], 4, false).unwrap();
    let out = vtrace_loss(
        &model,
        &batch,
        &LossConfig::default(),
        &mut CorrectionArena::default(),
        &device,
    );
    let grads = GradientsParams::from_grads(out.total.backward(), &model);
    let model = optimizer.step(1e-2, model, grads);
    let after = crate::model::encode_params::<AB, _>(&model).unwrap();
    assert_ne!(before, after);
}

#[test]
fn test_update_below_minimum_is_none() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let store = filled_store(10, 3);
    let handle = spawn_trainer(
        small_config(10),
        MlpNet::<AB>::init(&spec(), &Default::default()),
        Arc::clone(&store),
        Arc::clone(&shutdown),
    );

    assert!(handle.update().is_none());
    assert!(wait_until(Duration::from_secs(2), || handle.phase() == TrainerPhase::Waiting));
    assert_eq!(handle.train_steps(), 0);

    shutdown.store(true, Ordering::Relaxed);
    assert!(handle.join().is_some());
}

#[test]
fn test_update_returns_decodable_snapshot() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let store = filled_store(4, 8);
    let handle = spawn_trainer(
        small_config(4),
        MlpNet::<AB>::init(&spec(), &Default::default()),
        store,
        Arc::clone(&shutdown),
    );

    let first = handle.update().expect("snapshot once the store is ready");
    assert!(!first.is_baseline());
    assert!(handle.train_steps() >= 1);

    let bytes = first.params.as_ref().unwrap();
    let decoded = decode_params::<B, MlpNet<B>>(bytes, &spec(), &Default::default()).unwrap();
    assert_eq!(decoded.num_params(), MlpNet::<B>::init(&spec(), &Default::default()).num_params());

    let second = handle.update().unwrap();
    assert!(second.era > first.era);
    assert_ne!(first.params, second.params);

    shutdown.store(true, Ordering::Relaxed);
    let model = handle.join().unwrap();
    assert!(model.num_params() > 0);
}

#[test]
fn test_zero_parameter_model_answers_without_training() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let store = filled_store(2, 4);
    let handle = spawn_trainer(
        small_config(2),
        UniformModel::<AB>::init(&spec(), &Default::default()),
        store,
        Arc::clone(&shutdown),
    );

    let snapshot = handle.update().expect("uniform model still answers");
    assert!(snapshot.era >= 1);
    assert!(snapshot.is_baseline());
    assert_eq!(handle.train_steps(), 0);

    shutdown.store(true, Ordering::Relaxed);
    assert!(handle.join().is_some());
}

#[test]
fn test_shutdown_unblocks_pending_update() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let store = filled_store(2, 4);
    let handle = Arc::new(spawn_trainer(
        small_config(2),
        MlpNet::<AB>::init(&spec(), &Default::default()),
        store,
        Arc::clone(&shutdown),
    ));
    shutdown.store(true, Ordering::Relaxed);
    // Either answered before noticing shutdown or returned None; never hangs.
    let _ = handle.update();
    assert!(wait_until(Duration::from_secs(5), || handle.phase() == TrainerPhase::Stopped));
}

#[test]
fn test_diverged_parameters_stop_training() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let store = filled_store(2, 4);
    let mut config = small_config(2);
    config.max_nonfinite_batches = 3;
    let handle = spawn_trainer(
        config,
        DivergedNet::<AB>::init(&spec(), &Default::default()),
        store,
        Arc::clone(&shutdown),
    );

    // Answered with "no update" instead of blocking until shutdown.
    assert!(handle.update().is_none());
    assert!(!shutdown.load(Ordering::Relaxed));
    assert!(wait_until(Duration::from_secs(5), || handle.phase() == TrainerPhase::Stopped));
    assert_eq!(handle.train_steps(), 0);
    assert!(handle.update().is_none());

    shutdown.store(true, Ordering::Relaxed);
    assert!(handle.join().is_some());
}

#[test]
fn test_epoch_stats_means() {
    let mut stats = EpochStats::default();
    stats.record(2.0, 1.0, 4.0, 2.0);
    stats.record(2.0, 1.0, 4.0, 2.0);
    assert_eq!(stats.batches, 2);
    let (p, v, e) = stats.means();
    assert!((p - 1.0).abs() < 1e-9);
    assert!((v - 0.5).abs() < 1e-9);
    assert!((e - 2.0).abs() < 1e-9);
}
