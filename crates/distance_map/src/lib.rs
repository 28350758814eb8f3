//! # Distance Map
//!
//! 通道索引 → 赛段长度 (米) 的静态查找表，供下游速度计算使用。
//!
//! Built by positional match of the ordered channel list against the
//! ordered sector list; only the first `min(channels, sectors)` entries are
//! mapped.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

/// Channel index → sector length lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceMap {
    lengths: HashMap<usize, f64>,
    has_distance: bool,
}

impl DistanceMap {
    /// Build from channel indices in sector order and sector lengths in track order
    pub fn new(channels: &[usize], sectors: &[f64]) -> Self {
        let mut map = Self::default();
        map.initialize(channels, sectors);
        map
    }

    /// Build for channels `0..channel_count`
    pub fn from_counts(channel_count: usize, sectors: &[f64]) -> Self {
        let channels: Vec<usize> = (0..channel_count).collect();
        Self::new(&channels, sectors)
    }

    /// Replace the whole table
    pub fn initialize(&mut self, channels: &[usize], sectors: &[f64]) {
        let lengths: HashMap<usize, f64> = channels
            .iter()
            .copied()
            .zip(sectors.iter().copied())
            .collect();

        self.has_distance = lengths.values().any(|&length| length > 0.0);
        self.lengths = lengths;

        debug!(
            mapped = self.lengths.len(),
            has_distance = self.has_distance,
            "distance map initialized"
        );
    }

    /// Sector length for a channel, `None` when unmapped
    pub fn distance(&self, channel: usize) -> Option<f64> {
        self.lengths.get(&channel).copied()
    }

    /// True iff any mapped length is positive
    pub fn has_distance(&self) -> bool {
        self.has_distance
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Average speed over the sector ending at `channel` (m/s)
    ///
    /// `None` when the channel is unmapped, its length is 0, or `elapsed` is zero.
    pub fn speed(&self, channel: usize, elapsed: Duration) -> Option<f64> {
        let length = self.distance(channel).filter(|&length| length > 0.0)?;
        let seconds = elapsed.as_secs_f64();
        (seconds > 0.0).then(|| length / seconds)
    }
}
