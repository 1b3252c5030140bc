//! Model eras and immutable parameter snapshots.
//!
//! Every published model is tagged with an era. Eras only move forward;
//! the coordinator advances the counter once per update and everyone else
//! reads it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Strictly increasing era counter.
#[derive(Debug)]
pub struct EraCounter {
    era: AtomicU64,
}

impl EraCounter {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Resume counting from a previously persisted era.
    pub fn starting_at(era: u64) -> Self {
        Self {
            era: AtomicU64::new(era),
        }
    }

    /// Advance to the next era, returning it.
    pub fn advance(&self) -> u64 {
        self.era.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.era.load(Ordering::SeqCst)
    }
}

impl Default for EraCounter {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedEraCounter = Arc<EraCounter>;

pub fn era_counter() -> SharedEraCounter {
    Arc::new(EraCounter::new())
}

/// Read-only copy of model parameters tagged with an era.
///
/// `params` holds the recorded parameter bytes. It is absent for the
/// uniform baseline served before the first update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub era: u64,
    pub params: Option<Arc<Vec<u8>>>,
}

impl ModelSnapshot {
    /// Parameter-free baseline (uniform random policy).
    pub fn baseline(era: u64) -> Self {
        Self { era, params: None }
    }

    pub fn new(era: u64, params: Vec<u8>) -> Self {
        Self {
            era,
            params: Some(Arc::new(params)),
        }
    }

    /// The same parameters under a new era.
    pub fn relabel(&self, era: u64) -> Self {
        Self {
            era,
            params: self.params.clone(),
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.params.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_era_counter_advances() {
        let counter = EraCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.advance(), 1);
        assert_eq!(counter.advance(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_era_counter_resume() {
        let counter = EraCounter::starting_at(7);
        assert_eq!(counter.advance(), 8);
    }

    #[test]
    fn test_era_counter_concurrent_advances_are_unique() {
        let counter = era_counter();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                std::thread::spawn(move || (0..100).map(|_| c.advance()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
        assert_eq!(counter.current(), 400);
    }

    #[test]
    fn test_snapshot_relabel_shares_params() {
        let snap = ModelSnapshot::new(1, vec![1, 2, 3]);
        let next = snap.relabel(2);
        assert_eq!(next.era, 2);
        assert!(Arc::ptr_eq(
            snap.params.as_ref().unwrap(),
            next.params.as_ref().unwrap()
        ));
    }

    #[test]
    fn test_baseline_has_no_params() {
        let snap = ModelSnapshot::baseline(3);
        assert!(snap.is_baseline());
        assert_eq!(snap.era, 3);
        assert!(!ModelSnapshot::new(4, vec![1, 2]).is_baseline());
    }
}
