//! Append-only pass record buffer, drained wholesale by snapshots.

use std::fmt;

use tracing::warn;

use crate::PassRecord;

/// Depth at which a growing buffer is reported
pub const DEFAULT_SOFT_LIMIT: usize = 256;

/// Pass records waiting for the next node snapshot
///
/// Records are never evicted: a record without a snapshot stays until one
/// arrives or detection restarts. The soft limit only triggers a warning
/// (once per fill) so sustained snapshot loss is visible in the logs.
pub struct PassBuffer {
    records: Vec<PassRecord>,
    soft_limit: usize,
    over_limit: bool,
    total_pushed: u64,
}

impl fmt::Debug for PassBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassBuffer")
            .field("len", &self.records.len())
            .field("soft_limit", &self.soft_limit)
            .field("total_pushed", &self.total_pushed)
            .finish()
    }
}

impl Default for PassBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_LIMIT)
    }
}

impl PassBuffer {
    pub fn new(soft_limit: usize) -> Self {
        Self {
            records: Vec::new(),
            soft_limit,
            over_limit: false,
            total_pushed: 0,
        }
    }

    /// Append a record, returning the new depth
    pub fn push(&mut self, record: PassRecord) -> usize {
        self.records.push(record);
        self.total_pushed += 1;

        let len = self.records.len();
        if len > self.soft_limit && !self.over_limit {
            self.over_limit = true;
            warn!(
                depth = len,
                soft_limit = self.soft_limit,
                "pass records accumulating without node snapshots"
            );
        }
        len
    }

    /// Swap out every buffered record, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<PassRecord> {
        self.over_limit = false;
        std::mem::take(&mut self.records)
    }

    /// Drop stale records, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        self.drain().len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(node: usize, timestamp: f64) -> PassRecord {
        PassRecord {
            node,
            frequency: 5658,
            timestamp,
        }
    }

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let mut buffer = PassBuffer::default();
        buffer.push(record(1, 30.0));
        buffer.push(record(0, 10.0));

        let drained = buffer.drain();
        assert_eq!(drained, vec![record(1, 30.0), record(0, 10.0)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_soft_limit_never_drops() {
        let mut buffer = PassBuffer::new(2);
        for i in 0..5 {
            buffer.push(record(0, i as f64));
        }

        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.total_pushed(), 5);
        assert_eq!(buffer.clear(), 5);
        assert!(buffer.is_empty());
    }
}
