//! Lock manager metrics
//!
//! Counters are updated with relaxed atomics on the hot paths and read as a
//! consistent-enough snapshot for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Operation counters of one lock manager
#[derive(Debug, Default)]
pub struct LockMetrics {
    /// Acquire calls
    pub acquires: AtomicU64,
    /// Requests granted without waiting, including new lock items
    pub immediate_grants: AtomicU64,
    /// Acquisitions already covered by the owner's grant
    pub reentrant_grants: AtomicU64,
    /// Grants that changed the mode of an existing request
    pub conversions: AtomicU64,
    /// Requests that had to wait
    pub waits: AtomicU64,
    /// Waits that ended with a grant
    pub waited_grants: AtomicU64,
    pub timeouts: AtomicU64,
    pub denials: AtomicU64,
    /// Release calls that dropped a reference
    pub releases: AtomicU64,
    pub invalid_releases: AtomicU64,
    pub resizes: AtomicU64,
}

impl LockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            acquires: self.acquires.load(Ordering::Relaxed),
            immediate_grants: self.immediate_grants.load(Ordering::Relaxed),
            reentrant_grants: self.reentrant_grants.load(Ordering::Relaxed),
            conversions: self.conversions.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            waited_grants: self.waited_grants.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            denials: self.denials.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            invalid_releases: self.invalid_releases.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.acquires,
            &self.immediate_grants,
            &self.reentrant_grants,
            &self.conversions,
            &self.waits,
            &self.waited_grants,
            &self.timeouts,
            &self.denials,
            &self.releases,
            &self.invalid_releases,
            &self.resizes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`LockMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetricsSnapshot {
    pub acquires: u64,
    pub immediate_grants: u64,
    pub reentrant_grants: u64,
    pub conversions: u64,
    pub waits: u64,
    pub waited_grants: u64,
    pub timeouts: u64,
    pub denials: u64,
    pub releases: u64,
    pub invalid_releases: u64,
    pub resizes: u64,
}

impl LockMetricsSnapshot {
    /// Fraction of acquires that had to wait
    pub fn wait_ratio(&self) -> f64 {
        if self.acquires == 0 {
            0.0
        } else {
            self.waits as f64 / self.acquires as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = LockMetrics::new();
        LockMetrics::record(&metrics.acquires);
        LockMetrics::record(&metrics.acquires);
        LockMetrics::record(&metrics.waits);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.acquires, 2);
        assert_eq!(snapshot.waits, 1);
        assert!((snapshot.wait_ratio() - 0.5).abs() < f64::EPSILON);

        metrics.reset();
        assert_eq!(metrics.snapshot(), LockMetricsSnapshot::default());
        assert_eq!(LockMetricsSnapshot::default().wait_ratio(), 0.0);
    }
}
