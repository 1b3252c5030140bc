//! Request/result handoff between the coordinator and the trainer.
//!
//! The coordinator raises a request flag and blocks on a condition variable;
//! the trainer notices the flag between batches, records its parameters and
//! reports the result into the slot, waking the coordinator. Flag and result
//! live under one mutex so a report can never race a fresh request.
//!
//! ```text
//! coordinator: request() ──► [requested=true] ──► wait() ... ◄── notify
//! trainer:     is_requested()? ─► report(snapshot) ─► [requested=false, result=Some]
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct SlotState<S> {
    requested: bool,
    result: Option<S>,
    closed: bool,
}

/// Single-slot request/result handoff.
///
/// At most one result is pending at any time; a report overwrites an
/// unclaimed previous result.
pub struct UpdateSlot<S> {
    state: Mutex<SlotState<S>>,
    cond: Condvar,
    requested_count: AtomicUsize,
    reported_count: AtomicUsize,
}

impl<S> UpdateSlot<S> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                requested: false,
                result: None,
                closed: false,
            }),
            cond: Condvar::new(),
            requested_count: AtomicUsize::new(0),
            reported_count: AtomicUsize::new(0),
        }
    }

    /// Raise the request flag.
    pub fn request(&self) {
        let mut state = self.state.lock();
        state.requested = true;
        self.requested_count.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        self.state.lock().requested
    }

    /// Store a result and clear the request flag.
    pub fn report(&self, result: S) {
        let mut state = self.state.lock();
        state.requested = false;
        state.result = Some(result);
        self.reported_count.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }

    /// Block until a result is reported, the slot is closed, or `shutdown`
    /// is raised. The shutdown flag is checked every `poll` interval.
    pub fn wait(&self, shutdown: &AtomicBool, poll: Duration) -> Option<S> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.result.take() {
                return Some(result);
            }
            if state.closed || shutdown.load(Ordering::Relaxed) {
                return None;
            }
            self.cond.wait_for(&mut state, poll);
        }
    }

    /// Request and block for the matching result.
    pub fn request_and_wait(&self, shutdown: &AtomicBool, poll: Duration) -> Option<S> {
        self.request();
        self.wait(shutdown, poll)
    }

    /// Block until a request is raised or `timeout` passes.
    pub fn wait_for_request(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.requested && !state.closed {
            self.cond.wait_for(&mut state, timeout);
        }
        state.requested
    }

    /// Wake all waiters permanently; later waits return `None` immediately.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// (requests, reports)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.requested_count.load(Ordering::Relaxed),
            self.reported_count.load(Ordering::Relaxed),
        )
    }
}

impl<S> Default for UpdateSlot<S> {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedUpdateSlot<S> = Arc<UpdateSlot<S>>;

pub fn update_slot<S>() -> SharedUpdateSlot<S> {
    Arc::new(UpdateSlot::new())
}
