//! Pools of worker threads.
//!
//! Local pools talk to the coordinator over its envelope channel; remote
//! pools register with the entry service first and then open one TCP
//! connection per worker against the request server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use burn::tensor::backend::Backend;
use crossbeam_channel::Sender;
use log::{info, warn};

use super::worker::{Role, Worker, WorkerConfig, WorkerError, WorkerStats};
use crate::config::TrainConfig;
use crate::coordinator::request_entry;
use crate::messages::{EntryRequest, Envelope};
use crate::model::{GruNet, MlpNet, ModelKind, PolicyValueModel, UniformModel};
use crate::transport::{Client, LocalClient, TcpClient};

pub struct WorkerHandle {
    pub id: usize,
    pub role: Role,
    thread: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> std::thread::Result<WorkerStats> {
        self.thread.join()
    }
}

#[derive(Default)]
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn count(&self, role: Role) -> usize {
        self.handles.iter().filter(|h| h.role == role).count()
    }

    pub fn finished_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_finished()).count()
    }

    /// Start one worker thread over `client`.
    pub fn spawn<B, M, C>(
        &mut self,
        config: WorkerConfig,
        client: C,
        device: B::Device,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), WorkerError>
    where
        B: Backend,
        M: PolicyValueModel<B>,
        C: Client + 'static,
    {
        let (id, role) = (config.id, config.role);
        let name = config.name();
        let worker = Worker::<B, M, C>::new(config, client, device, shutdown)?;
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())?;
        self.handles.push(WorkerHandle { id, role, thread });
        Ok(())
    }

    /// Start `num_generators` generators and `num_evaluators` evaluators
    /// inside this process.
    pub fn spawn_local<B, M>(
        config: &TrainConfig,
        tx: Sender<Envelope>,
        device: B::Device,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, WorkerError>
    where
        B: Backend,
        M: PolicyValueModel<B>,
    {
        let mut pool = Self::new();
        let roles = std::iter::repeat(Role::Generator)
            .take(config.num_generators)
            .chain(std::iter::repeat(Role::Evaluator).take(config.num_evaluators));
        for (id, role) in roles.enumerate() {
            pool.spawn::<B, M, _>(
                WorkerConfig::from_train_config(id, role, config),
                LocalClient::new(tx.clone()),
                device.clone(),
                Arc::clone(&shutdown),
            )?;
        }
        info!(
            "started {} local workers ({} generators, {} evaluators)",
            pool.len(),
            pool.count(Role::Generator),
            pool.count(Role::Evaluator)
        );
        Ok(pool)
    }

    /// Stop every worker and collect its stats.
    pub fn join_all(self, shutdown: &AtomicBool) -> Vec<WorkerStats> {
        shutdown.store(true, Ordering::Relaxed);
        self.handles
            .into_iter()
            .filter_map(|h| {
                let id = h.id;
                match h.join() {
                    Ok(stats) => Some(stats),
                    Err(_) => {
                        warn!("worker {} panicked", id);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Register `num_process` workers of this host with a remote entry service
/// and start them against the server's request port.
///
/// The model architecture comes from the config the server returns.
pub fn join_remote<B: Backend>(
    server_host: &str,
    entry_port: u16,
    num_process: usize,
    device: B::Device,
    shutdown: Arc<AtomicBool>,
) -> Result<WorkerPool, WorkerError> {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let response = request_entry(
        (server_host, entry_port),
        &EntryRequest { host, num_process },
    )?;
    info!(
        "registered: generators {:?}, evaluators {:?}",
        response.generator_ids, response.evaluator_ids
    );

    let config = response.config;
    let kind: ModelKind = config.model.parse()?;
    let assigned = response
        .generator_ids
        .iter()
        .map(|&id| (id, Role::Generator))
        .chain(response.evaluator_ids.iter().map(|&id| (id, Role::Evaluator)));

    let mut pool = WorkerPool::new();
    for (id, role) in assigned {
        let client = TcpClient::connect((server_host, config.server_port))?;
        let worker_config = WorkerConfig::from_train_config(id, role, &config);
        let shutdown = Arc::clone(&shutdown);
        match kind {
            ModelKind::Uniform => pool.spawn::<B, UniformModel<B>, _>(
                worker_config,
                client,
                device.clone(),
                shutdown,
            )?,
            ModelKind::Mlp => {
                pool.spawn::<B, MlpNet<B>, _>(worker_config, client, device.clone(), shutdown)?
            }
            ModelKind::Gru => {
                pool.spawn::<B, GruNet<B>, _>(worker_config, client, device.clone(), shutdown)?
            }
        }
    }
    Ok(pool)
}
