//! Flow control gate for the output pump
//!
//! A monitor (mutex + condition variable) with two delivery states, flowing
//! and paused. The output pump blocks here at the top of every read
//! iteration; `resume` wakes it without any polling. Pausing the pump stops
//! draining the PTY, so the kernel buffer fills and backpressures the child
//! process — end-to-end flow control with no extra buffering layer.

use std::sync::{Condvar, Mutex, PoisonError};

/// Gate state guarded by the monitor mutex.
#[derive(Debug, Default)]
struct GateState {
    /// Delivery is paused; the pump must not read.
    paused: bool,
    /// The gate has been released for teardown and never blocks again.
    released: bool,
}

/// Monitor gating a session's output-delivery path.
///
/// Only the output pump waits on the gate. Writes and resizes are never
/// gated; pause/resume affect delivery only.
#[derive(Debug, Default)]
pub struct FlowGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl FlowGate {
    /// Create a gate in the flowing state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause delivery. Takes effect at the pump's next read iteration;
    /// data already in flight is still delivered.
    pub fn pause(&self) {
        let mut state = self.lock();
        state.paused = true;
    }

    /// Resume delivery, waking the pump if it is blocked on the gate.
    pub fn resume(&self) {
        let mut state = self.lock();
        state.paused = false;
        drop(state);
        self.cond.notify_all();
    }

    /// Permanently open the gate during teardown so a paused pump can
    /// observe the closed PTY and terminate instead of leaking.
    pub fn release(&self) {
        let mut state = self.lock();
        state.released = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Whether delivery is currently paused.
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Block while paused. Returns `true` when the pump may proceed with a
    /// read, `false` once the gate has been released (pump must terminate).
    ///
    /// The paused flag is re-checked after every wake, so spurious wakes and
    /// pause/resume races resolve correctly.
    pub fn wait_until_flowing(&self) -> bool {
        let mut state = self.lock();
        while state.paused && !state.released {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        !state.released
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
