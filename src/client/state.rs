//! State shared between a session's `Conn` and its two workers.
//!
//! Everything else travels over channels. What lives here is the minimum
//! both sides must observe: the submission gate, the lifecycle, and the
//! bookkeeping the idle check reads.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};

use super::outbound::OutboundItem;

// ============================================================================
// Lifecycle
// ============================================================================

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Exchanges flowing.
    Open,
    /// Close requested (explicitly, by drop, by idle timeout or by a
    /// failure); workers are winding down.
    Closing,
    /// Workers have exited.
    Closed,
}

// ============================================================================
// SessionState
// ============================================================================

/// Client-side session state.
pub(crate) struct SessionState {
    /// `false` once the outbound worker stops taking items.
    accepting: RwLock<bool>,
    /// Lifecycle, observed by both workers.
    lifecycle: watch::Sender<Lifecycle>,
    /// Last time application bytes moved in either direction.
    last_activity: Mutex<Instant>,
    /// Last time a parked application read was polled. Cleared when the
    /// read completes. A read future dropped while parked stops refreshing
    /// it, so it goes stale instead of pinning the session open.
    read_parked: Mutex<Option<Instant>>,
    /// Set when a worker terminated on an error rather than a clean stop.
    failed: AtomicBool,
}

impl SessionState {
    /// Creates state for a fresh session.
    pub(crate) fn new() -> Arc<Self> {
        let (lifecycle, _) = watch::channel(Lifecycle::Open);
        Arc::new(Self {
            accepting: RwLock::new(true),
            lifecycle,
            last_activity: Mutex::new(Instant::now()),
            read_parked: Mutex::new(None),
            failed: AtomicBool::new(false),
        })
    }

    // ------------------------------------------------------------------------
    // Submission gate
    // ------------------------------------------------------------------------

    /// Enqueues an item unless the worker stopped accepting.
    ///
    /// Returns the item if it was rejected.
    pub(crate) fn submit(
        &self,
        tx: &mpsc::UnboundedSender<OutboundItem>,
        item: OutboundItem,
    ) -> Result<(), OutboundItem> {
        let accepting = self.accepting.read();
        if !*accepting {
            return Err(item);
        }
        tx.send(item).map_err(|e| e.0)
    }

    /// Closes the submission gate. Called once, by the outbound worker.
    pub(crate) fn stop_accepting(&self) {
        *self.accepting.write() = false;
    }

    /// Returns `true` while writes are accepted.
    #[cfg(test)]
    pub(crate) fn is_accepting(&self) -> bool {
        *self.accepting.read()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Subscribes to lifecycle changes.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Returns the current lifecycle.
    #[inline]
    pub(crate) fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Moves `Open` to `Closing`. Returns `true` if this call did it.
    pub(crate) fn begin_close(&self) -> bool {
        self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Open {
                *state = Lifecycle::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Marks the session fully closed.
    pub(crate) fn mark_closed(&self) {
        self.lifecycle.send_replace(Lifecycle::Closed);
    }

    /// Records that a worker terminated on an error.
    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if a worker terminated on an error.
    #[inline]
    pub(crate) fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Idle bookkeeping
    // ------------------------------------------------------------------------

    /// Records application traffic.
    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Records that the application is parked in a read.
    ///
    /// A parked reader must call this again at least once per idle period
    /// to keep counting as pending.
    pub(crate) fn mark_reading(&self) {
        *self.read_parked.lock() = Some(Instant::now());
    }

    /// Records that the application read completed.
    pub(crate) fn clear_reading(&self) {
        *self.read_parked.lock() = None;
    }

    /// Returns `true` if no read is pending and nothing moved for `idle`.
    pub(crate) fn is_idle(&self, idle: Duration) -> bool {
        let reading = self
            .read_parked
            .lock()
            .is_some_and(|parked| parked.elapsed() < idle);
        !reading && self.last_activity.lock().elapsed() >= idle
    }
}

// ============================================================================
// Tests
// ============================================================================
