//! Method occurrence waiters.
//!
//! Lets a caller suspend until any event with a given method is seen. This
//! answers "has this event fired", not "what did it carry"; observers that
//! need the payload subscribe instead.
//!
//! A slot per method is created by the first waiter and removed when the
//! last waiter leaves. While it exists, a recorded observation is sticky:
//! waiters joining later return `true` at once.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::trace;

// ============================================================================
// Types
// ============================================================================

/// Progress of one method slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Nothing seen yet.
    Waiting,
    /// At least one event with this method arrived.
    Observed,
    /// Connection terminated.
    Closed,
}

/// Shared wait slot for one method.
struct Slot {
    /// Broadcasts the slot state to all waiters.
    state: watch::Sender<SlotState>,
    /// Waiters currently holding the slot.
    waiters: usize,
}

/// State guarded by the waiters lock.
#[derive(Default)]
struct Inner {
    /// Live slots by method.
    slots: FxHashMap<String, Slot>,
    /// Set once the connection terminated.
    closed: bool,
}

// ============================================================================
// MethodWaiters
// ============================================================================

/// Registry of method wait slots.
pub(crate) struct MethodWaiters {
    /// Slots and the closed flag.
    inner: Mutex<Inner>,
}

impl MethodWaiters {
    /// Creates an empty registry.
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Suspends until `method` is observed or `wait` elapses.
    ///
    /// Returns `false` on timeout or when the connection terminates.
    pub(crate) async fn wait_for(&self, method: &str, wait: Duration) -> bool {
        let mut state = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }

            let slot = inner.slots.entry(method.to_string()).or_insert_with(|| Slot {
                state: watch::channel(SlotState::Waiting).0,
                waiters: 0,
            });
            slot.waiters += 1;
            slot.state.subscribe()
        };

        let _guard = SlotGuard {
            waiters: self,
            method,
        };

        match timeout(wait, state.wait_for(|s| *s != SlotState::Waiting)).await {
            Ok(Ok(state)) => *state == SlotState::Observed,
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// Records an occurrence of `method` and wakes all of its waiters.
    pub(crate) fn observe(&self, method: &str) {
        let inner = self.inner.lock();
        if let Some(slot) = inner.slots.get(method) {
            slot.state.send_if_modified(|state| {
                if *state == SlotState::Waiting {
                    *state = SlotState::Observed;
                    true
                } else {
                    false
                }
            });
            trace!(method, waiters = slot.waiters, "Method observed");
        }
    }

    /// Wakes every waiter with `false` and refuses new ones. Idempotent.
    pub(crate) fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;

        let mut woken = 0;
        for (_, slot) in inner.slots.drain() {
            slot.state.send_replace(SlotState::Closed);
            woken += slot.waiters;
        }
        woken
    }

    /// Releases one waiter's hold on a slot.
    fn release(&self, method: &str) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(method) {
            slot.waiters = slot.waiters.saturating_sub(1);
            if slot.waiters == 0 {
                inner.slots.remove(method);
            }
        }
    }

    /// Returns the number of live slots.
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

/// Drops a waiter's slot hold even if the wait is cancelled.
struct SlotGuard<'a> {
    /// Owning registry.
    waiters: &'a MethodWaiters,
    /// Slot method.
    method: &'a str,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.waiters.release(self.method);
    }
}

// ============================================================================
// Tests
// ============================================================================
