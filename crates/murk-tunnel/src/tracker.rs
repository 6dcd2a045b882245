//! Active-session accounting for graceful drain.
//!
//! Owners that juggle many [`Connection`](crate::Connection)s register a
//! guard per session (typically released from the disposed hook) and wait
//! for the count to reach zero on shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Tracks live sessions for graceful shutdown.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    zero_notify: Arc<Notify>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one live session; dropping the guard deregisters it.
    pub fn guard(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    pub fn count(&self) -> usize {
        // Acquire to synchronize with Release from guard drops
        self.active.load(Ordering::Acquire)
    }

    /// Wait until every guard has dropped, or until `timeout`. Returns
    /// whether the count reached zero.
    pub async fn wait_for_zero(&self, timeout: Duration) -> bool {
        if self.count() == 0 {
            return true;
        }
        let notified = self.zero_notify.notified();
        // Double-check: the last guard may have dropped before the
        // waiter registered above.
        if self.count() == 0 {
            return true;
        }
        tokio::select! {
            _ = notified => self.count() == 0,
            _ = tokio::time::sleep(timeout) => self.count() == 0,
        }
    }

    fn release(&self) {
        // AcqRel: see prior registrations, publish this release
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.zero_notify.notify_waiters();
        }
    }
}

/// Guard that deregisters its session on drop.
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
