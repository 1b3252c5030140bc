//! Worker loop and pool tests against scripted coordinators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use burn::backend::NdArray;
use crossbeam_channel::{unbounded, Receiver};

use super::*;
use crate::config::TrainConfig;
use crate::coordinator::EntryService;
use crate::core::episode::CompressedEpisode;
use crate::core::model_version::ModelSnapshot;
use crate::messages::{
    EvalReport, EvaluationArgs, Envelope, GenerationArgs, Request, Response,
};
use crate::model::{encode_params, InferencePolicy, MlpNet, ModelSpec, PolicyValueModel};
use crate::transport::{Client, RequestServer, TransportError};

type B = NdArray<f32>;

fn tictactoe_spec() -> ModelSpec {
    ModelSpec::new(19, 9, 8)
}

/// Answers a fixed number of submissions, then disconnects.
struct ScriptedClient {
    limit: usize,
    submitted: usize,
    episodes: Vec<CompressedEpisode>,
    results: Vec<EvalReport>,
    fetches: Vec<u64>,
    /// Era served for every fetch, `None` echoes the request.
    serve_era: Option<u64>,
    snapshot_params: Option<Vec<u8>>,
    model_eras: Vec<Vec<u64>>,
}

impl ScriptedClient {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            submitted: 0,
            episodes: Vec::new(),
            results: Vec::new(),
            fetches: Vec::new(),
            serve_era: None,
            snapshot_params: None,
            model_eras: vec![vec![0], vec![0]],
        }
    }
}

impl Client for ScriptedClient {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        if self.submitted >= self.limit {
            return Err(TransportError::Disconnected);
        }
        Ok(match request {
            Request::GenerationConfig(p) => Response::GenerationConfig(p.map(|_| GenerationArgs {
                episode_id: self.submitted as u64,
                player: self.submitted % 2,
                model_eras: self.model_eras.clone(),
            })),
            Request::EvaluationConfig(p) => Response::EvaluationConfig(p.map(|_| EvaluationArgs {
                era: 1,
                player: self.submitted % 2,
            })),
            Request::EpisodeSubmit(p) => {
                self.submitted += p.len();
                self.episodes.extend(p.clone().into_vec().into_iter().flatten());
                Response::Ack(p.map(|_| true))
            }
            Request::ResultSubmit(p) => {
                self.submitted += p.len();
                self.results.extend(p.clone().into_vec());
                Response::Ack(p.map(|_| true))
            }
            Request::ModelFetch(p) => {
                self.fetches.extend(p.clone().into_vec());
                let params = self.snapshot_params.clone();
                let serve_era = self.serve_era;
                Response::Model(p.map(|era| {
                    let era = serve_era.unwrap_or(era);
                    match &params {
                        Some(bytes) => ModelSnapshot::new(era, bytes.clone()),
                        None => ModelSnapshot::baseline(era),
                    }
                }))
            }
        })
    }
}

fn config(role: Role) -> WorkerConfig {
    WorkerConfig {
        id: 0,
        role,
        env: "tictactoe".to_string(),
        full_observation: false,
        hidden_size: 8,
        seed: 9,
    }
}

// =============================================================================
// Single worker
// =============================================================================

#[test]
fn test_generator_submits_decodable_episodes() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut worker = Worker::<B, MlpNet<B>, _>::new(
        config(Role::Generator),
        ScriptedClient::new(3),
        Default::default(),
        shutdown,
    )
    .unwrap();
    for _ in 0..3 {
        worker.generation_step().unwrap();
    }
    assert!(matches!(
        worker.generation_step(),
        Err(WorkerError::Transport(TransportError::Disconnected))
    ));
    assert_eq!(worker.stats().episodes, 3);

    let client = worker.client();
    assert_eq!(client.episodes.len(), 3);
    for packed in &client.episodes {
        let episode = packed.decompress().unwrap();
        assert_eq!(episode.num_players, 2);
        assert_eq!(episode.num_actions, 9);
    }
    // Era 0 is decoded once and served from the cache afterwards.
    assert_eq!(client.fetches, vec![0]);
}

#[test]
fn test_run_ends_when_coordinator_disconnects() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = Worker::<B, MlpNet<B>, _>::new(
        config(Role::Evaluator),
        ScriptedClient::new(4),
        Default::default(),
        Arc::clone(&shutdown),
    )
    .unwrap();
    let stats = worker.run();
    assert_eq!(stats.results, 4);
    assert_eq!(stats.episodes, 0);
    assert!(!shutdown.load(Ordering::Relaxed));
}

#[test]
fn test_run_observes_shutdown() {
    let shutdown = Arc::new(AtomicBool::new(true));
    let worker = Worker::<B, MlpNet<B>, _>::new(
        config(Role::Generator),
        ScriptedClient::new(100),
        Default::default(),
        shutdown,
    )
    .unwrap();
    assert_eq!(worker.run().episodes, 0);
}

#[test]
fn test_evaluator_reports_evaluated_era() {
    let device = Default::default();
    let model = MlpNet::<B>::init(&tictactoe_spec(), &device);
    let mut client = ScriptedClient::new(2);
    client.snapshot_params = Some(encode_params::<B, _>(&model).unwrap());

    let mut worker =
        Worker::<B, MlpNet<B>, _>::new(config(Role::Evaluator), client, device, Arc::new(AtomicBool::new(false)))
            .unwrap();
    worker.evaluation_step().unwrap();
    worker.evaluation_step().unwrap();

    let client = worker.client();
    assert_eq!(client.results.len(), 2);
    for report in &client.results {
        assert_eq!(report.era, 1);
        assert!([-1.0, 0.0, 1.0].contains(&report.outcome.unwrap()));
    }
    assert_eq!(client.fetches, vec![1]);
}

#[test]
fn test_unknown_environment_is_rejected() {
    let mut bad = config(Role::Generator);
    bad.env = "chess".to_string();
    let result = Worker::<B, MlpNet<B>, _>::new(
        bad,
        ScriptedClient::new(1),
        Default::default(),
        Arc::new(AtomicBool::new(false)),
    );
    assert!(matches!(result, Err(WorkerError::Env(_))));
}

// =============================================================================
// Model cache
// =============================================================================

#[test]
fn test_cache_skips_fallback_replies() {
    let mut client = ScriptedClient::new(10);
    client.serve_era = Some(4);
    let mut cache = ModelCache::<B, MlpNet<B>>::new(tictactoe_spec(), Default::default());
    cache.policy(9, &mut client).unwrap();
    cache.policy(9, &mut client).unwrap();
    assert_eq!(client.fetches, vec![9, 9]);
    assert!(cache.is_empty());
}

#[test]
fn test_seat_policies_build_congress() {
    let device = Default::default();
    let model = MlpNet::<B>::init(&tictactoe_spec(), &device);
    let mut client = ScriptedClient::new(10);
    client.snapshot_params = Some(encode_params::<B, _>(&model).unwrap());

    let mut cache = ModelCache::<B, MlpNet<B>>::new(tictactoe_spec(), device);
    let seats = cache
        .seat_policies(&[vec![3], vec![1, 2, 1]], &mut client)
        .unwrap();
    assert!(matches!(seats[0], InferencePolicy::Model(_)));
    match &seats[1] {
        InferencePolicy::Congress(members) => assert_eq!(members.len(), 3),
        other => panic!("expected congress, got {:?}", other),
    }
    assert_eq!(client.fetches, vec![3, 1, 2]);
    assert_eq!(cache.len(), 3);
}

// =============================================================================
// Pools
// =============================================================================

/// Serves `limit` envelopes with baseline answers, then hangs up.
fn answer(rx: Receiver<Envelope>, limit: usize) -> JoinHandle<(usize, usize)> {
    std::thread::spawn(move || {
        let (mut episodes, mut results) = (0, 0);
        for _ in 0..limit {
            let Ok(Envelope { request, reply }) = rx.recv() else {
                break;
            };
            let response = match request {
                Request::GenerationConfig(p) => Response::GenerationConfig(p.map(|_| GenerationArgs {
                    episode_id: 0,
                    player: 0,
                    model_eras: vec![vec![0], vec![0]],
                })),
                Request::EvaluationConfig(p) => {
                    Response::EvaluationConfig(p.map(|_| EvaluationArgs { era: 0, player: 1 }))
                }
                Request::EpisodeSubmit(p) => {
                    episodes += p.len();
                    Response::Ack(p.map(|_| true))
                }
                Request::ResultSubmit(p) => {
                    results += p.len();
                    Response::Ack(p.map(|_| true))
                }
                Request::ModelFetch(p) => Response::Model(p.map(ModelSnapshot::baseline)),
            };
            let _ = reply.send(response);
        }
        (episodes, results)
    })
}

#[test]
fn test_local_pool_spawns_roles() {
    let config = TrainConfig::default()
        .with_seed(1)
        .with_workers(2, 1)
        .with_hidden_size(8);
    let (tx, rx) = unbounded();
    let coordinator = answer(rx, 60);
    let shutdown = Arc::new(AtomicBool::new(false));

    let pool =
        WorkerPool::spawn_local::<B, MlpNet<B>>(&config, tx, Default::default(), Arc::clone(&shutdown))
            .unwrap();
    assert_eq!(pool.count(Role::Generator), 2);
    assert_eq!(pool.count(Role::Evaluator), 1);

    let (episodes, results) = coordinator.join().unwrap();
    assert!(episodes > 0);
    assert!(results > 0);

    let stats = pool.join_all(&shutdown);
    assert_eq!(stats.len(), 3);
    let submitted: usize = stats.iter().map(|s| s.episodes + s.null_episodes).sum();
    assert_eq!(submitted, episodes);
}

#[test]
fn test_remote_workers_join_through_entry_service() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let (tx, rx) = unbounded();
    let mut server = RequestServer::bind("127.0.0.1:0", tx, Arc::clone(&shutdown)).unwrap();
    let coordinator = answer(rx, 40);

    let config = TrainConfig::default()
        .with_hidden_size(8)
        .with_ports(0, server.local_addr().port());
    let mut entry = EntryService::bind("127.0.0.1:0", config, Arc::clone(&shutdown)).unwrap();

    let pool = join_remote::<B>(
        "127.0.0.1",
        entry.local_addr().port(),
        3,
        Default::default(),
        Arc::clone(&shutdown),
    )
    .unwrap();
    assert_eq!(pool.len(), 3);
    assert_eq!(pool.count(Role::Generator), 1);

    let (episodes, results) = coordinator.join().unwrap();
    assert!(episodes + results > 0);

    let worker_shutdown = Arc::new(AtomicBool::new(false));
    let stats = pool.join_all(&worker_shutdown);
    assert_eq!(stats.len(), 3);

    shutdown.store(true, Ordering::Relaxed);
    server.stop();
    entry.stop();
}
