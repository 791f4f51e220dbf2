//! Producer counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Producer metrics
#[derive(Debug, Default)]
pub struct ProducerMetrics {
    /// Samples pushed into the timeline
    pub samples_published: AtomicU64,

    /// Pushes the timeline refused
    pub publish_errors: AtomicU64,

    /// Sub-elements left absent on purpose
    pub occluded_slots: AtomicU64,
}

impl ProducerMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.samples_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_occluded(&self) {
        self.occluded_slots.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_published: self.samples_published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            occluded_slots: self.occluded_slots.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub samples_published: u64,
    pub publish_errors: u64,
    pub occluded_slots: u64,
}

impl std::ops::Add for MetricsSnapshot {
    type Output = MetricsSnapshot;

    fn add(self, rhs: Self) -> Self::Output {
        MetricsSnapshot {
            samples_published: self.samples_published + rhs.samples_published,
            publish_errors: self.publish_errors + rhs.publish_errors,
            occluded_slots: self.occluded_slots + rhs.occluded_slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = ProducerMetrics::new();
        metrics.record_published();
        metrics.record_published();
        metrics.record_occluded();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.samples_published, 2);
        assert_eq!(snapshot.occluded_slots, 1);
        assert_eq!(snapshot.publish_errors, 0);

        let total = snapshot + snapshot;
        assert_eq!(total.samples_published, 4);
    }
}
