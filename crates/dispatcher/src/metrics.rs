//! Per-sink counters, readable while the worker runs

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

const NO_EVENT: i64 = i64::MIN;

/// Counters for a single sink
#[derive(Debug)]
pub struct SinkMetrics {
    queue_len: AtomicUsize,
    written: AtomicU64,
    failed: AtomicU64,
    /// Events that never reached the worker
    undelivered: AtomicU64,
    /// Crossing time of the last written event (micros), for lag reporting
    last_event_micros: AtomicI64,
}

impl Default for SinkMetrics {
    fn default() -> Self {
        Self {
            queue_len: AtomicUsize::new(0),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            undelivered: AtomicU64::new(0),
            last_event_micros: AtomicI64::new(NO_EVENT),
        }
    }
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Record a successful write of an event that crossed at `time`
    pub fn record_written(&self, time: DateTime<Utc>) {
        self.written.fetch_add(1, Ordering::Relaxed);
        self.last_event_micros
            .fetch_max(time.timestamp_micros(), Ordering::Relaxed);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }

    pub fn inc_undelivered(&self) {
        self.undelivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest crossing time written so far
    pub fn last_event_time(&self) -> Option<DateTime<Utc>> {
        match self.last_event_micros.load(Ordering::Relaxed) {
            NO_EVENT => None,
            micros => DateTime::from_timestamp_micros(micros),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            written: self.written(),
            failed: self.failed(),
            undelivered: self.undelivered(),
            last_event_time: self.last_event_time(),
        }
    }
}

/// Point-in-time copy of sink counters (for reporting)
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub written: u64,
    pub failed: u64,
    pub undelivered: u64,
    pub last_event_time: Option<DateTime<Utc>>,
}
