//! Bounded episode store with recency-biased sampling.
//!
//! The coordinator is the only writer; batcher workers read concurrently.
//! Episodes stay compressed while stored and are handed out behind `Arc`s,
//! so readers never copy episode bytes under the lock.
//!
//! Sampling draws an index uniformly over the retained window and accepts it
//! with probability `1 - (N - 1 - i) / maximum_episodes`. The newest episode
//! is always accepted; with a full store the oldest is accepted with
//! probability `1 / maximum_episodes`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::core::episode::CompressedEpisode;

#[derive(Debug, Clone)]
pub struct EpisodeStoreConfig {
    /// Retained episodes; the oldest are evicted beyond this bound.
    pub maximum_episodes: usize,
    /// Episodes required before training may start.
    pub minimum_episodes: usize,
}

impl Default for EpisodeStoreConfig {
    fn default() -> Self {
        Self {
            maximum_episodes: 100_000,
            minimum_episodes: 400,
        }
    }
}

impl EpisodeStoreConfig {
    pub fn new(minimum_episodes: usize, maximum_episodes: usize) -> Self {
        Self {
            maximum_episodes,
            minimum_episodes,
        }
    }
}

/// Acceptance probability of index `index` in a store of `len` episodes.
pub fn acceptance_probability(index: usize, len: usize, maximum_episodes: usize) -> f64 {
    if len == 0 || maximum_episodes == 0 || index >= len {
        return 0.0;
    }
    let age = (len - 1 - index) as f64;
    (1.0 - age / maximum_episodes as f64).max(0.0)
}

pub struct EpisodeStore {
    config: EpisodeStoreConfig,
    episodes: RwLock<VecDeque<Arc<CompressedEpisode>>>,
    total_admitted: AtomicUsize,
    total_evicted: AtomicUsize,
}

impl EpisodeStore {
    pub fn new(config: EpisodeStoreConfig) -> Self {
        let capacity = config.maximum_episodes.min(4096);
        Self {
            config,
            episodes: RwLock::new(VecDeque::with_capacity(capacity)),
            total_admitted: AtomicUsize::new(0),
            total_evicted: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &EpisodeStoreConfig {
        &self.config
    }

    /// Append an episode, evicting from the oldest end past the bound.
    pub fn admit(&self, episode: CompressedEpisode) {
        self.admit_all(std::iter::once(episode));
    }

    pub fn admit_all(&self, episodes: impl IntoIterator<Item = CompressedEpisode>) {
        let mut store = self.episodes.write();
        let mut admitted = 0;
        for episode in episodes {
            store.push_back(Arc::new(episode));
            admitted += 1;
        }
        let mut evicted = 0;
        while store.len() > self.config.maximum_episodes {
            store.pop_front();
            evicted += 1;
        }
        self.total_admitted.fetch_add(admitted, Ordering::Relaxed);
        self.total_evicted.fetch_add(evicted, Ordering::Relaxed);
    }

    /// Draw one episode with recency bias. `None` when the store is empty.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<CompressedEpisode>> {
        let store = self.episodes.read();
        Self::sample_locked(&store, self.config.maximum_episodes, rng)
    }

    /// Draw `n` episodes (with replacement) under a single read lock.
    pub fn sample_many<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Option<Vec<Arc<CompressedEpisode>>> {
        let store = self.episodes.read();
        (0..n)
            .map(|_| Self::sample_locked(&store, self.config.maximum_episodes, rng))
            .collect()
    }

    fn sample_locked<R: Rng + ?Sized>(
        store: &VecDeque<Arc<CompressedEpisode>>,
        maximum_episodes: usize,
        rng: &mut R,
    ) -> Option<Arc<CompressedEpisode>> {
        let len = store.len();
        if len == 0 {
            return None;
        }
        let window = len.min(maximum_episodes);
        loop {
            let index = len - window + rng.gen_range(0..window);
            let accept = acceptance_probability(index, len, maximum_episodes);
            if rng.gen::<f64>() < accept {
                return Some(Arc::clone(&store[index]));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.read().is_empty()
    }

    /// Enough episodes stored to start training.
    pub fn is_ready(&self) -> bool {
        self.len() >= self.config.minimum_episodes
    }

    pub fn total_admitted(&self) -> usize {
        self.total_admitted.load(Ordering::Relaxed)
    }

    pub fn total_evicted(&self) -> usize {
        self.total_evicted.load(Ordering::Relaxed)
    }
}
