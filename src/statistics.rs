//! Process-wide counters backing `RouterAdmin.GetStatistics` (protos/router.proto).
//! Atomics only, no external metrics exporter — the teacher's `prometheus`
//! feature is not carried forward here (see DESIGN.md).

use std::sync::atomic::{AtomicU64, Ordering};

use service::Service;

pub trait Number {
    fn add(&self, value: u64);
    fn get(&self) -> u64;
}

#[derive(Default)]
pub struct Count(AtomicU64);

impl Number for Count {
    fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A point-in-time view of the router's counters, shaped to match
/// `protos/router.proto`'s `Statistics` message.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub active_sessions: u64,
    pub physical_routes: u64,
    pub logical_routes: u64,
    pub duplicate_leaf_detections: u64,
}

/// Process-wide message counters. `active_sessions`/`physical_routes`/
/// `logical_routes` are not tracked here directly — they are read live off
/// [`Service`] at snapshot time, since those tables are already the source
/// of truth (spec.md §4.3, §4.4, §4.7).
///
/// # Example
///
/// ```
/// use mesh_router::statistics::Statistics;
///
/// let statistics = Statistics::default();
/// statistics.record_sent(1);
/// statistics.record_received(2);
/// assert_eq!(statistics.sent(), 1);
/// assert_eq!(statistics.received(), 2);
/// ```
#[derive(Default, Clone)]
pub struct Statistics {
    inner: std::sync::Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    sent: Count,
    received: Count,
    dropped: Count,
    duplicate_leaf_detections: Count,
}

impl Statistics {
    pub fn record_sent(&self, n: u64) {
        self.inner.sent.add(n);
    }

    pub fn record_received(&self, n: u64) {
        self.inner.received.add(n);
    }

    pub fn record_dropped(&self, n: u64) {
        self.inner.dropped.add(n);
    }

    pub fn record_duplicate_leaf_detection(&self) {
        self.inner.duplicate_leaf_detections.add(1);
    }

    pub fn sent(&self) -> u64 {
        self.inner.sent.get()
    }

    pub fn received(&self) -> u64 {
        self.inner.received.get()
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.get()
    }

    pub fn duplicate_leaf_detections(&self) -> u64 {
        self.inner.duplicate_leaf_detections.get()
    }

    pub fn snapshot(&self, service: &Service) -> StatisticsSnapshot {
        StatisticsSnapshot {
            messages_sent: self.sent(),
            messages_received: self.received(),
            messages_dropped: self.dropped(),
            active_sessions: service.sessions().active_count() as u64,
            physical_routes: service.physical_routes().len() as u64,
            logical_routes: service.logical_routes().len() as u64,
            duplicate_leaf_detections: self.duplicate_leaf_detections(),
        }
    }
}
