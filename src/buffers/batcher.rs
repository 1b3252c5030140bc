//! Parallel batch assembly.
//!
//! `num_batchers` worker threads sample episodes from the [`EpisodeStore`],
//! decompress them, cut windows and push finished batches into a bounded
//! queue. A full queue blocks the workers (backpressure); the trainer pops
//! from the other end.
//!
//! ```text
//! EpisodeStore ──sample──► Batcher-0 ─┐
//!              ──sample──► Batcher-1 ─┼──► bounded queue (3 × batch_size) ──► Trainer
//!              ──sample──► Batcher-N ─┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::batch::{make_batch, Batch};
use super::episode_store::EpisodeStore;
use crate::core::episode::Episode;

/// Interval at which blocked workers re-check the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub num_batchers: usize,
    pub batch_size: usize,
    pub forward_steps: usize,
    pub full_observation: bool,
    pub queue_capacity: usize,
    pub seed: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            num_batchers: 2,
            batch_size: 64,
            forward_steps: 16,
            full_observation: false,
            queue_capacity: 192,
            seed: 0,
        }
    }
}

impl BatcherConfig {
    pub fn from_train_config(config: &crate::config::TrainConfig) -> Self {
        Self {
            num_batchers: config.num_batchers,
            batch_size: config.batch_size,
            forward_steps: config.forward_steps,
            full_observation: config.observation,
            queue_capacity: config.batch_queue_capacity(),
            seed: config.seed,
        }
    }
}

pub struct Batcher {
    config: BatcherConfig,
    store: Arc<EpisodeStore>,
    tx: Sender<Batch>,
    rx: Receiver<Batch>,
    stop: Arc<AtomicBool>,
    produced: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
}

impl Batcher {
    pub fn new(config: BatcherConfig, store: Arc<EpisodeStore>) -> Self {
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        Self {
            config,
            store,
            tx,
            rx,
            stop: Arc::new(AtomicBool::new(false)),
            produced: Arc::new(AtomicUsize::new(0)),
            handles: Vec::new(),
        }
    }

    /// Spawn the worker threads. Calling `start` on a running batcher is a
    /// no-op.
    pub fn start(&mut self) -> std::io::Result<()> {
        if !self.handles.is_empty() {
            return Ok(());
        }
        self.stop.store(false, Ordering::SeqCst);
        for id in 0..self.config.num_batchers {
            let handle = std::thread::Builder::new()
                .name(format!("Batcher-{}", id))
                .spawn({
                    let config = self.config.clone();
                    let store = Arc::clone(&self.store);
                    let tx = self.tx.clone();
                    let stop = Arc::clone(&self.stop);
                    let produced = Arc::clone(&self.produced);
                    move || batcher_loop(id, config, store, tx, stop, produced)
                })?;
            self.handles.push(handle);
        }
        log::info!("started {} batcher(s)", self.config.num_batchers);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Pop a batch, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Batch> {
        match self.rx.recv_timeout(timeout) {
            Ok(batch) => Some(batch),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Batch> {
        self.rx.try_recv().ok()
    }

    /// Batches currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::Relaxed)
    }

    /// Stop the workers after their current unit of work and join them.
    /// Batches already queued remain available.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("batcher thread panicked");
            }
        }
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn batcher_loop(
    id: usize,
    config: BatcherConfig,
    store: Arc<EpisodeStore>,
    tx: Sender<Batch>,
    stop: Arc<AtomicBool>,
    produced: Arc<AtomicUsize>,
) {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(id as u64 + 1));
    let mut episodes: Vec<Episode> = Vec::with_capacity(config.batch_size);

    while !stop.load(Ordering::Relaxed) {
        let Some(sampled) = store.sample_many(config.batch_size, &mut rng) else {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        };

        episodes.clear();
        for packed in sampled {
            match packed.decompress() {
                Ok(ep) => episodes.push(ep),
                Err(e) => log::warn!("batcher {}: dropping undecodable episode: {}", id, e),
            }
        }
        if episodes.is_empty() {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        let mut batch = match make_batch(
            &episodes,
            config.forward_steps,
            config.full_observation,
            &mut rng,
        ) {
            Ok(batch) => batch,
            Err(e) => {
                log::warn!("batcher {}: skipping batch: {}", id, e);
                continue;
            }
        };

        loop {
            match tx.send_timeout(batch, POLL_INTERVAL) {
                Ok(()) => {
                    produced.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(SendTimeoutError::Timeout(b)) => {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    batch = b;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
    log::debug!("batcher {} stopped", id);
}
