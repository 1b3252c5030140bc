//! Tests for the episode store, window assembly and the batcher pipeline.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::*;
use crate::core::episode::tests::sample_episode;
use crate::core::episode::{CompressedEpisode, ILLEGAL_ACTION_PENALTY};

// =============================================================================
// Helpers
// =============================================================================

/// Compressed placeholder whose `steps` field tags its admission order.
fn tagged(tag: usize) -> CompressedEpisode {
    CompressedEpisode {
        steps: tag,
        num_players: 2,
        bytes: Vec::new(),
    }
}

fn store(minimum: usize, maximum: usize) -> EpisodeStore {
    EpisodeStore::new(EpisodeStoreConfig::new(minimum, maximum))
}

// =============================================================================
// Episode store
// =============================================================================

#[test]
fn test_store_never_exceeds_bound() {
    let store = store(0, 10);
    for i in 0..25 {
        store.admit(tagged(i));
        assert!(store.len() <= 10);
    }
    assert_eq!(store.len(), 10);
    assert_eq!(store.total_admitted(), 25);
    assert_eq!(store.total_evicted(), 15);
}

#[test]
fn test_store_evicts_oldest_first() {
    let store = store(0, 3);
    store.admit_all((0..5).map(tagged));
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..200 {
        let ep = store.sample(&mut rng).unwrap();
        assert!(ep.steps >= 2, "evicted episode {} was sampled", ep.steps);
    }
}

#[test]
fn test_acceptance_probability_bounds() {
    let max = 1000;
    assert_eq!(acceptance_probability(max - 1, max, max), 1.0);
    let oldest = acceptance_probability(0, max, max);
    assert!((oldest - 1.0 / max as f64).abs() < 1e-12);

    // Partially filled store: newest still always accepted.
    assert_eq!(acceptance_probability(9, 10, max), 1.0);
    assert!(acceptance_probability(0, 10, max) > 0.99);

    assert_eq!(acceptance_probability(0, 0, max), 0.0);
}

#[test]
fn test_sample_from_empty_store() {
    let store = store(0, 10);
    let mut rng = StdRng::seed_from_u64(0);
    assert!(store.sample(&mut rng).is_none());
    assert!(store.sample_many(4, &mut rng).is_none());
}

#[test]
fn test_sampling_prefers_recent_episodes() {
    let store = store(0, 100);
    store.admit_all((0..100).map(tagged));
    let mut rng = StdRng::seed_from_u64(7);

    let mut old = 0usize;
    let mut recent = 0usize;
    for _ in 0..20_000 {
        let ep = store.sample(&mut rng).unwrap();
        if ep.steps < 50 {
            old += 1;
        } else {
            recent += 1;
        }
    }
    // Expected ratio is about 3:1.
    assert!(recent > 2 * old, "recent={} old={}", recent, old);
}

#[test]
fn test_store_readiness() {
    let store = store(3, 10);
    assert!(!store.is_ready());
    store.admit_all((0..2).map(tagged));
    assert!(!store.is_ready());
    store.admit(tagged(2));
    assert!(store.is_ready());
}

#[test]
fn test_store_concurrent_readers() {
    let store = Arc::new(store(0, 50));
    store.admit_all((0..50).map(tagged));

    let readers: Vec<_> = (0..4)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(i);
                for _ in 0..500 {
                    assert!(store.sample(&mut rng).is_some());
                }
            })
        })
        .collect();
    for i in 50..100 {
        store.admit(tagged(i));
    }
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(store.len(), 50);
}

// =============================================================================
// Window assembly
// =============================================================================

#[test]
fn test_short_episode_is_padded() {
    let ep = sample_episode(3);
    let batch = assemble_batch(&[ep.clone()], &[0], 5, false).unwrap();

    let (p, a) = (batch.num_players, batch.num_actions);
    assert_eq!(batch.steps, 5);
    assert_eq!(batch.observed_players, 1);

    for t in 0..3 {
        assert_eq!(batch.turn_mask[t * p + ep.turns[t]], 1.0);
        assert_eq!(batch.actions[t], ep.actions[t] as i32);
        assert!((batch.progress[t] - t as f32 / 3.0).abs() < 1e-6);
    }
    for t in 3..5 {
        assert_eq!(&batch.turn_mask[t * p..(t + 1) * p], &[0.0, 0.0]);
        assert_eq!(&batch.value_mask[t * p..(t + 1) * p], &[0.0, 0.0]);
        assert!(batch.action_penalty[t * a..(t + 1) * a]
            .iter()
            .all(|&x| x == ILLEGAL_ACTION_PENALTY));
        assert_eq!(batch.actions[t], 0);
        assert_eq!(batch.progress[t], 1.0);
        assert_eq!(&batch.value_targets[t * p..(t + 1) * p], ep.outcome.as_slice());
        assert!(batch.behavior_logits[t * a..(t + 1) * a]
            .iter()
            .all(|&x| x == 0.0));
    }
    assert_eq!(batch.data_count(), 3.0);
    assert_eq!(batch.returns, ep.outcome);
}

#[test]
fn test_turn_only_mode_uses_turn_player_observation() {
    let ep = sample_episode(4);
    let batch = assemble_batch(&[ep.clone()], &[1], 2, false).unwrap();
    let s = batch.observation_size;

    // Step 1 belongs to player 1.
    assert_eq!(&batch.observations[0..s], &[1.0, 1.0, 1.0]);
    // Step 2 belongs to player 0.
    assert_eq!(&batch.observations[s..2 * s], &[2.0, 0.0, 1.0]);
    // Value mask equals the turn mask.
    assert_eq!(batch.value_mask, batch.turn_mask);
}

#[test]
fn test_full_observation_layout_zero_fills_absent_entries() {
    let ep = sample_episode(2);
    let batch = assemble_batch(&[ep], &[0], 3, true).unwrap();
    let (po, s) = (batch.observed_players, batch.observation_size);
    assert_eq!(po, 2);
    assert_eq!(batch.observations.len(), 3 * po * s);

    // t=0: player 0 observed, player 1 absent.
    assert_eq!(&batch.observations[0..s], &[0.0, 0.0, 1.0]);
    assert_eq!(&batch.observations[s..2 * s], &[0.0, 0.0, 0.0]);
    // t=1: player 1 observed.
    assert_eq!(&batch.observations[2 * s..3 * s], &[0.0, 0.0, 0.0]);
    assert_eq!(&batch.observations[3 * s..4 * s], &[1.0, 1.0, 1.0]);

    // Value mask is all ones on real steps and zero on padding.
    assert_eq!(&batch.value_mask[0..4], &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(&batch.value_mask[4..6], &[0.0, 0.0]);
}

#[test]
fn test_time_major_layout_across_episodes() {
    let short = sample_episode(1);
    let long = sample_episode(4);
    let batch = assemble_batch(&[short, long], &[0, 0], 2, false).unwrap();
    // Index (t, b) = t * B + b.
    assert_eq!(batch.turn_presence(), vec![1.0, 1.0, 0.0, 1.0]);
    assert_eq!(batch.progress[2], 1.0);
    assert!((batch.progress[3] - 0.25).abs() < 1e-6);
}

#[test]
fn test_window_start_stays_in_range() {
    assert_eq!(window_candidates(3, 5), 1);
    assert_eq!(window_candidates(10, 4), 7);

    let episodes = vec![sample_episode(10)];
    let mut rng = StdRng::seed_from_u64(3);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..500 {
        let batch = make_batch(&episodes, 4, false, &mut rng).unwrap();
        let start = (batch.progress[0] * 10.0).round() as usize;
        assert!(start <= 6);
        // Windows inside a long episode are never padded.
        assert_eq!(batch.data_count(), 4.0);
        seen.insert(start);
    }
    assert_eq!(seen.len(), 7);
}

#[test]
fn test_batch_rejects_mismatched_episodes() {
    let a = sample_episode(3);
    let mut b = sample_episode(3);
    b.num_actions = 5;
    for logits in &mut b.policy_logits {
        logits.push(0.0);
    }
    let err = assemble_batch(&[a, b], &[0, 0], 3, false).unwrap_err();
    assert!(matches!(
        err,
        BatchError::ShapeMismatch {
            index: 1,
            field: "num_actions",
            ..
        }
    ));
    assert_eq!(
        assemble_batch(&[], &[], 3, false).unwrap_err(),
        BatchError::Empty
    );
}

// =============================================================================
// Batcher
// =============================================================================

fn batcher_config(batch_size: usize, capacity: usize) -> BatcherConfig {
    BatcherConfig {
        num_batchers: 2,
        batch_size,
        forward_steps: 4,
        full_observation: false,
        queue_capacity: capacity,
        seed: 11,
    }
}

#[test]
fn test_batcher_produces_batches() {
    let store = Arc::new(store(0, 100));
    store.admit_all((3..9).map(|n| sample_episode(n).compress().unwrap()));

    let mut batcher = Batcher::new(batcher_config(4, 6), Arc::clone(&store));
    batcher.start().unwrap();
    assert!(batcher.is_running());

    let batch = batcher
        .recv_timeout(Duration::from_secs(5))
        .expect("batcher produced nothing");
    assert_eq!(batch.batch_size, 4);
    assert_eq!(batch.steps, 4);
    assert_eq!(batch.actions.len(), 16);

    batcher.stop();
    assert!(!batcher.is_running());
}

#[test]
fn test_batcher_waits_on_empty_store() {
    let store = Arc::new(store(0, 100));
    let mut batcher = Batcher::new(batcher_config(2, 4), Arc::clone(&store));
    batcher.start().unwrap();
    assert!(batcher.recv_timeout(Duration::from_millis(100)).is_none());

    store.admit(sample_episode(5).compress().unwrap());
    assert!(batcher.recv_timeout(Duration::from_secs(5)).is_some());
    batcher.stop();
}

#[test]
fn test_batcher_queue_is_bounded() {
    let store = Arc::new(store(0, 100));
    store.admit(sample_episode(6).compress().unwrap());

    let mut batcher = Batcher::new(batcher_config(2, 3), Arc::clone(&store));
    batcher.start().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert!(batcher.queued() <= 3);
    assert!(batcher.produced() <= 3);

    // Stopping leaves queued batches consumable.
    batcher.stop();
    let queued = batcher.queued();
    for _ in 0..queued {
        assert!(batcher.try_recv().is_some());
    }
}

#[test]
fn test_batcher_skips_undecodable_episodes() {
    let store = Arc::new(store(0, 100));
    store.admit(CompressedEpisode {
        steps: 3,
        num_players: 2,
        bytes: vec![1, 2, 3],
    });
    let mut batcher = Batcher::new(batcher_config(2, 4), Arc::clone(&store));
    batcher.start().unwrap();
    assert!(batcher.recv_timeout(Duration::from_millis(150)).is_none());
    batcher.stop();
}
