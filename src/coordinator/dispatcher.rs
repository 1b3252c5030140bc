//! Central request dispatcher.
//!
//! The coordinator is the single owner of the episode counter, the result
//! table and the current era. It serves envelopes from one channel in
//! arrival order; after every `update_episodes` issued generation configs
//! (counted from `minimum_episodes`) it reports the win rate of the current
//! era, pulls a snapshot from the trainer, advances the era and persists it.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use burn::tensor::backend::Backend;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::buffers::episode_store::EpisodeStore;
use crate::checkpoint::{CheckpointError, Checkpointer};
use crate::config::TrainConfig;
use crate::core::episode::CompressedEpisode;
use crate::core::model_version::{era_counter, ModelSnapshot, SharedEraCounter};
use crate::learner::{TrainerHandle, UpdateRequester};
use crate::messages::{
    Envelope, EvalReport, EvaluationArgs, GenerationArgs, Payload, Request, Response,
};
use crate::metrics::{server_metrics, ResultTable, SharedServerMetrics, WinRateReport};
use crate::model::{ModelSpec, PolicyValueModel};

/// Receive timeout of the serve loop; bounds how late shutdown is noticed.
const RECV_POLL: Duration = Duration::from_millis(100);

/// Persisted eras kept in memory after a fetch.
const HISTORY_CACHE: usize = 16;

/// Source of new snapshots at era boundaries.
pub trait SnapshotSource: Send {
    /// `None` means no update: the current parameters carry over.
    fn update(&self) -> Option<ModelSnapshot>;
}

impl<M: Send> SnapshotSource for TrainerHandle<M> {
    fn update(&self) -> Option<ModelSnapshot> {
        TrainerHandle::update(self)
    }
}

impl SnapshotSource for UpdateRequester {
    fn update(&self) -> Option<ModelSnapshot> {
        UpdateRequester::update(self)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub minimum_episodes: usize,
    pub update_episodes: usize,
    pub num_players: usize,
    pub congress: bool,
    pub max_eras: u64,
    pub seed: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_train_config(&TrainConfig::default(), 2)
    }
}

impl CoordinatorConfig {
    pub fn from_train_config(config: &TrainConfig, num_players: usize) -> Self {
        Self {
            minimum_episodes: config.minimum_episodes,
            update_episodes: config.update_episodes,
            num_players,
            congress: config.congress,
            max_eras: config.max_eras,
            seed: config.seed,
        }
    }
}

/// Opponent eras sampled per seat in congress mode: `1 + ⌊log2(era + 1)⌋`.
pub fn congress_size(era: u64) -> usize {
    1 + (era + 1).ilog2() as usize
}

/// Request dispatcher, generic over the inference model used to validate
/// persisted snapshots.
pub struct Coordinator<B: Backend, M> {
    config: CoordinatorConfig,
    rx: Receiver<Envelope>,
    store: Arc<EpisodeStore>,
    updater: Box<dyn SnapshotSource>,
    checkpointer: Checkpointer,
    spec: ModelSpec,
    device: B::Device,
    shutdown: Arc<AtomicBool>,
    era: SharedEraCounter,
    current: ModelSnapshot,
    history: BTreeMap<u64, ModelSnapshot>,
    results: ResultTable,
    num_episodes: u64,
    num_results: u64,
    metrics: SharedServerMetrics,
    rng: StdRng,
    _model: PhantomData<M>,
}

impl<B, M> Coordinator<B, M>
where
    B: Backend,
    M: PolicyValueModel<B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        rx: Receiver<Envelope>,
        store: Arc<EpisodeStore>,
        updater: Box<dyn SnapshotSource>,
        checkpointer: Checkpointer,
        spec: ModelSpec,
        device: B::Device,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rx,
            store,
            updater,
            checkpointer,
            spec,
            device,
            shutdown,
            era: era_counter(),
            current: ModelSnapshot::baseline(0),
            history: BTreeMap::new(),
            results: ResultTable::new(),
            num_episodes: 0,
            num_results: 0,
            metrics: server_metrics(),
            rng,
            _model: PhantomData,
        }
    }

    pub fn era(&self) -> u64 {
        self.era.current()
    }

    /// Generation configs issued so far.
    pub fn num_episodes(&self) -> u64 {
        self.num_episodes
    }

    pub fn num_results(&self) -> u64 {
        self.num_results
    }

    pub fn current_snapshot(&self) -> &ModelSnapshot {
        &self.current
    }

    pub fn win_rate(&self, era: u64) -> Option<f64> {
        self.results.win_rate(era)
    }

    pub fn results(&self) -> &ResultTable {
        &self.results
    }

    pub fn metrics(&self) -> SharedServerMetrics {
        Arc::clone(&self.metrics)
    }

    pub fn era_counter(&self) -> SharedEraCounter {
        Arc::clone(&self.era)
    }

    /// Serve requests until shutdown, the request channel closes, or
    /// `max_eras` eras have been published.
    pub fn serve(&mut self) {
        info!("started server");
        let mut prev_update = self.config.minimum_episodes as u64;
        'serve: loop {
            let next_update = prev_update + self.config.update_episodes as u64;
            while self.num_episodes < next_update {
                if self.shutdown.load(Ordering::Relaxed) {
                    break 'serve;
                }
                match self.rx.recv_timeout(RECV_POLL) {
                    Ok(envelope) => self.dispatch(envelope),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break 'serve,
                }
            }
            prev_update = next_update;
            self.update();

            if self.config.max_eras > 0 && self.era() >= self.config.max_eras {
                info!("reached {} eras", self.config.max_eras);
                self.shutdown.store(true, Ordering::Relaxed);
                break;
            }
        }
        info!("finished server");
    }

    /// Answer one envelope; a vanished requester is not an error.
    pub fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { request, reply } = envelope;
        let kind = request.kind();
        let response = self.handle(request);
        if reply.send(response).is_err() {
            debug!("requester of {} went away", kind);
        }
    }

    pub fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::GenerationConfig(p) => {
                let args = (0..p.len()).map(|_| self.generation_args()).collect();
                Response::GenerationConfig(p.mirror(args))
            }
            Request::EvaluationConfig(p) => {
                let args = (0..p.len()).map(|_| self.evaluation_args()).collect();
                Response::EvaluationConfig(p.mirror(args))
            }
            Request::EpisodeSubmit(p) => {
                let acks = vec![true; p.len()];
                let response = Response::Ack(p.mirror(acks));
                self.feed_episodes(p.into_vec());
                response
            }
            Request::ResultSubmit(p) => {
                let acks = vec![true; p.len()];
                let response = Response::Ack(p.mirror(acks));
                self.feed_results(p.into_vec());
                response
            }
            Request::ModelFetch(p) => {
                let eras = p.clone().into_vec();
                let snapshots = eras.into_iter().map(|era| self.fetch_model(era)).collect();
                Response::Model(p.mirror(snapshots))
            }
        }
    }

    fn generation_args(&mut self) -> GenerationArgs {
        let era = self.era();
        let player = (self.num_episodes % self.config.num_players as u64) as usize;
        let model_eras = (0..self.config.num_players)
            .map(|seat| {
                if seat == player || !self.config.congress {
                    vec![era]
                } else {
                    (0..congress_size(era))
                        .map(|_| self.rng.gen_range(0..=era))
                        .collect()
                }
            })
            .collect();
        let args = GenerationArgs {
            episode_id: self.num_episodes,
            player,
            model_eras,
        };
        self.num_episodes += 1;
        if self.num_episodes % 100 == 0 {
            debug!("{} generation configs issued", self.num_episodes);
        }
        args
    }

    fn evaluation_args(&mut self) -> EvaluationArgs {
        let args = EvaluationArgs {
            era: self.era(),
            player: (self.num_results % self.config.num_players as u64) as usize,
        };
        self.num_results += 1;
        args
    }

    fn feed_episodes(&mut self, episodes: Vec<Option<CompressedEpisode>>) {
        let mut admitted = Vec::with_capacity(episodes.len());
        for episode in episodes {
            match episode {
                Some(episode) => {
                    self.metrics.record_episode();
                    admitted.push(episode);
                }
                None => self.metrics.record_null_episode(),
            }
        }
        self.store.admit_all(admitted);
    }

    fn feed_results(&mut self, reports: Vec<EvalReport>) {
        for report in reports {
            if let Some(outcome) = report.outcome {
                self.results.record(report.era, outcome);
                self.metrics.record_result();
            }
        }
    }

    fn fetch_model(&mut self, era: u64) -> ModelSnapshot {
        if era == self.current.era {
            self.metrics.record_model_fetch(false);
            return self.current.clone();
        }
        if era == 0 {
            self.metrics.record_model_fetch(false);
            return ModelSnapshot::baseline(0);
        }
        if let Some(snapshot) = self.history.get(&era) {
            self.metrics.record_model_fetch(false);
            return snapshot.clone();
        }
        match self
            .checkpointer
            .load_validated::<B, M>(era, &self.spec, &self.device)
        {
            Ok(snapshot) => {
                self.remember(snapshot.clone());
                self.metrics.record_model_fetch(false);
                snapshot
            }
            Err(e) => {
                warn!(
                    "model era {} unavailable ({}), serving era {}",
                    era, e, self.current.era
                );
                self.metrics.record_model_fetch(true);
                self.current.clone()
            }
        }
    }

    fn remember(&mut self, snapshot: ModelSnapshot) {
        self.history.insert(snapshot.era, snapshot);
        while self.history.len() > HISTORY_CACHE {
            self.history.pop_first();
        }
    }

    /// Publish a new era.
    pub fn update(&mut self) -> WinRateReport {
        let report = self.results.win_rate_report(self.era());
        info!("win rate = {}", report);

        let next = match self.updater.update() {
            Some(snapshot) => snapshot,
            None => {
                info!("no update");
                self.current.clone()
            }
        };
        let previous = std::mem::replace(&mut self.current, next);
        if !previous.is_baseline() {
            self.remember(previous);
        }

        let era = self.era.advance();
        self.current = self.current.relabel(era);
        match self.checkpointer.save_era(&self.current) {
            Ok(path) => info!("updated model({}) -> {}", era, path.display()),
            Err(CheckpointError::NoCheckpoints(_)) => {
                info!("updated model({}) (uniform baseline)", era)
            }
            Err(e) => warn!("failed to persist era {}: {}", era, e),
        }
        report
    }
}
