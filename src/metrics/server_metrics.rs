//! Request counters shared between the coordinator and the runner.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Thread-safe coordinator counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    episodes: AtomicUsize,
    null_episodes: AtomicUsize,
    results: AtomicUsize,
    model_fetches: AtomicUsize,
    fetch_fallbacks: AtomicUsize,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_episode(&self) {
        self.episodes.fetch_add(1, Ordering::Relaxed);
    }

    /// A submission slot that carried no episode.
    pub fn record_null_episode(&self) {
        self.null_episodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self) {
        self.results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_fetch(&self, fell_back: bool) {
        self.model_fetches.fetch_add(1, Ordering::Relaxed);
        if fell_back {
            self.fetch_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn episodes(&self) -> usize {
        self.episodes.load(Ordering::Relaxed)
    }

    pub fn null_episodes(&self) -> usize {
        self.null_episodes.load(Ordering::Relaxed)
    }

    pub fn results(&self) -> usize {
        self.results.load(Ordering::Relaxed)
    }

    pub fn model_fetches(&self) -> usize {
        self.model_fetches.load(Ordering::Relaxed)
    }

    pub fn fetch_fallbacks(&self) -> usize {
        self.fetch_fallbacks.load(Ordering::Relaxed)
    }
}

pub type SharedServerMetrics = Arc<ServerMetrics>;

pub fn server_metrics() -> SharedServerMetrics {
    Arc::new(ServerMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ServerMetrics::new();
        metrics.record_episode();
        metrics.record_episode();
        metrics.record_null_episode();
        metrics.record_result();
        metrics.record_model_fetch(false);
        metrics.record_model_fetch(true);

        assert_eq!(metrics.episodes(), 2);
        assert_eq!(metrics.null_episodes(), 1);
        assert_eq!(metrics.results(), 1);
        assert_eq!(metrics.model_fetches(), 2);
        assert_eq!(metrics.fetch_fallbacks(), 1);
    }

    #[test]
    fn test_shared_across_threads() {
        let metrics = server_metrics();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_result();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.results(), 400);
    }
}
