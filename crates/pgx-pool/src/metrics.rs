//! Pool metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of pool counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Sessions opened by the factory.
    pub connections_created: u64,
    /// Sessions closed by the pool.
    pub connections_closed: u64,
    /// Factory calls that failed.
    pub creation_failures: u64,
    /// Acquires that returned a session.
    pub checkouts_successful: u64,
    /// Acquires that returned an error.
    pub checkouts_failed: u64,
    /// Acquires that had to queue as a waiter.
    pub checkouts_waited: u64,
    /// Acquires abandoned because their deadline elapsed.
    pub acquisition_timeouts: u64,
    /// Sessions or growth permits passed directly to a waiter.
    pub handoffs: u64,
}

impl PoolMetrics {
    /// Fraction of acquires that succeeded, `1.0` when nothing was attempted.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            1.0
        } else {
            self.checkouts_successful as f64 / total as f64
        }
    }
}

/// Lock-free counters backing [`PoolMetrics`].
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    creation_failures: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    checkouts_waited: AtomicU64,
    acquisition_timeouts: AtomicU64,
    handoffs: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn creation_failed(&self) {
        self.creation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn checkout(&self, success: bool) {
        if success {
            self.checkouts_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.checkouts_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn waited(&self) {
        self.checkouts_waited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timed_out(&self) {
        self.acquisition_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handoff(&self) {
        self.handoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            checkouts_successful: self.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: self.checkouts_failed.load(Ordering::Relaxed),
            checkouts_waited: self.checkouts_waited.load(Ordering::Relaxed),
            acquisition_timeouts: self.acquisition_timeouts.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
        }
    }
}
