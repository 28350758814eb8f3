//! Bridge run statistics.

use std::collections::HashMap;
use std::time::Duration;

use contracts::{DeviceId, StatusReadout};
use dispatcher::MetricsSnapshot;
use observability::DetectionMetricsAggregator;

/// Statistics from a bridge run
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    /// Detections received from all devices
    pub detections: u64,

    /// Total duration of the run
    pub duration: Duration,

    /// Devices whose link came up
    pub connected_devices: usize,

    /// Devices that accepted the start of detection
    pub detecting_devices: usize,

    /// Links dropped by the heartbeat-timeout sweep
    pub timeouts: u64,

    /// Detection metrics aggregator
    pub detection_metrics: DetectionMetricsAggregator,

    /// Final counters per sink
    pub sink_metrics: Vec<(String, MetricsSnapshot)>,

    /// Last status readout per device
    pub device_status: HashMap<DeviceId, StatusReadout>,
}

impl BridgeStats {
    /// Detections per minute over the run
    pub fn rate_per_minute(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.detections as f64 * 60.0 / secs
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                      Bridge Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Detections: {}", self.detections);
        println!("   ├─ Rate: {:.2}/min", self.rate_per_minute());
        println!("   ├─ Connected devices: {}", self.connected_devices);
        println!("   ├─ Detecting devices: {}", self.detecting_devices);
        println!("   └─ Heartbeat timeouts: {}", self.timeouts);

        if !self.device_status.is_empty() {
            let mut devices: Vec<_> = self.device_status.iter().collect();
            devices.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

            println!("\n📡 Devices");
            for (i, (id, readout)) in devices.iter().enumerate() {
                let prefix = if i == devices.len() - 1 { "└─" } else { "├─" };
                let mark = if readout.ok { "✓" } else { "⚠" };
                println!("   {prefix} {id}: {mark} {}", readout.value);
            }
        }

        if !self.sink_metrics.is_empty() {
            println!("\n📤 Sinks");
            for (i, (name, snapshot)) in self.sink_metrics.iter().enumerate() {
                let prefix = if i == self.sink_metrics.len() - 1 {
                    "└─"
                } else {
                    "├─"
                };
                println!(
                    "   {prefix} {name}: written={} failed={} undelivered={}",
                    snapshot.written, snapshot.failed, snapshot.undelivered
                );
            }
        }

        println!("\n{}", self.detection_metrics.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_per_minute() {
        let stats = BridgeStats {
            detections: 30,
            duration: Duration::from_secs(120),
            ..Default::default()
        };
        assert_eq!(stats.rate_per_minute(), 15.0);
        assert_eq!(BridgeStats::default().rate_per_minute(), 0.0);
    }
}
