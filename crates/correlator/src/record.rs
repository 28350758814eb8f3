//! Raw telemetry records, as decoded from the device.

use serde::{Deserialize, Serialize};

/// A crossing reported before its signal strength is known
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    /// Channel index on the device
    pub node: usize,

    /// Frequency in MHz the channel was listening on
    pub frequency: u32,

    /// Milliseconds since the device epoch
    pub timestamp: f64,
}

/// Per-channel peak signal, arriving on its own cadence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub pass_peak_rssi: Vec<i32>,
}

impl NodeSnapshot {
    /// Peak for a channel, 0 when the snapshot does not cover it
    pub fn peak(&self, node: usize) -> i32 {
        self.pass_peak_rssi.get(node).copied().unwrap_or(0)
    }
}
