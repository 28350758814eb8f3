//! 计时指标收集模块
//!
//! Prometheus 指标记录函数，以及检测事件的内存聚合统计。

use std::collections::HashMap;

use contracts::DetectionEvent;
use metrics::{counter, gauge, histogram};

/// 记录一次输出的检测事件
pub fn record_detection(device: &str, frequency: u32, peak: i32) {
    counter!(
        "timing_detections_total",
        "device" => device.to_string(),
        "frequency" => frequency.to_string()
    )
    .increment(1);

    histogram!("timing_detection_peak", "device" => device.to_string()).record(peak as f64);
}

/// 记录收到的 pass record 及缓冲深度
pub fn record_pass_record(device: &str, depth: usize) {
    counter!("timing_pass_records_total", "device" => device.to_string()).increment(1);
    record_buffer_depth(device, depth);
}

/// 记录缓冲区深度
pub fn record_buffer_depth(device: &str, depth: usize) {
    gauge!("timing_pass_buffer_depth", "device" => device.to_string()).set(depth as f64);
}

/// 记录时钟同步轮次结果
///
/// `outcome` 为 `committed` 或 `retained`。
pub fn record_clock_sync_round(device: &str, outcome: &str, rejected: u64) {
    counter!(
        "timing_clock_sync_rounds_total",
        "device" => device.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if rejected > 0 {
        counter!(
            "timing_clock_sync_rejected_samples_total",
            "device" => device.to_string()
        )
        .increment(rejected);
    }
}

/// 记录 epoch 相对上次估计的偏移 (毫秒)
pub fn record_epoch_shift_ms(device: &str, shift_ms: f64) {
    gauge!("timing_clock_epoch_shift_ms", "device" => device.to_string()).set(shift_ms);
    histogram!("timing_clock_epoch_shift_ms_hist", "device" => device.to_string())
        .record(shift_ms.abs());
}

/// 记录心跳
pub fn record_heartbeat(device: &str) {
    counter!("timing_heartbeats_total", "device" => device.to_string()).increment(1);
}

/// 记录断线及原因
pub fn record_disconnect(device: &str, reason: &str) {
    counter!(
        "timing_disconnects_total",
        "device" => device.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录无法解析的设备消息
pub fn record_malformed_message(device: &str, event: &str) {
    counter!(
        "timing_malformed_messages_total",
        "device" => device.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

/// 记录链路状态
pub fn record_link_state(device: &str, live: bool) {
    gauge!("timing_link_up", "device" => device.to_string()).set(if live { 1.0 } else { 0.0 });
}

/// 检测指标聚合器
///
/// 在内存中聚合检测事件，运行结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct DetectionMetricsAggregator {
    /// 检测总数
    pub total_detections: u64,

    /// 时间倒退的检测数 (相对同一设备的上一条)
    pub out_of_order: u64,

    /// 峰值信号统计
    pub peak_stats: RunningStats,

    /// 各频率圈速统计 (同一设备同一频率相邻两次检测的间隔, 秒)
    pub lap_stats: HashMap<u32, RunningStats>,

    /// 各设备检测次数
    pub device_counts: HashMap<String, u64>,

    last_seen: HashMap<(String, u32), f64>,
    last_device_time: HashMap<String, f64>,
}

impl DetectionMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, event: &DetectionEvent) {
        let device = event.device.to_string();
        let time = contracts::to_seconds(event.time);

        self.total_detections += 1;
        *self.device_counts.entry(device.clone()).or_insert(0) += 1;
        self.peak_stats.push(event.peak as f64);

        if let Some(previous) = self.last_device_time.insert(device.clone(), time) {
            if time < previous {
                self.out_of_order += 1;
            }
        }

        if let Some(previous) = self.last_seen.insert((device, event.frequency), time) {
            let lap = time - previous;
            if lap > 0.0 {
                self.lap_stats.entry(event.frequency).or_default().push(lap);
            }
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_detections: self.total_detections,
            out_of_order: self.out_of_order,
            peak: StatsSummary::from(&self.peak_stats),
            lap_seconds: self
                .lap_stats
                .iter()
                .map(|(frequency, stats)| (*frequency, StatsSummary::from(stats)))
                .collect(),
            device_counts: self.device_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_detections: u64,
    pub out_of_order: u64,
    pub peak: StatsSummary,
    pub lap_seconds: HashMap<u32, StatsSummary>,
    pub device_counts: HashMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Detection Summary ===")?;
        writeln!(f, "Total detections: {}", self.total_detections)?;
        writeln!(f, "Out-of-order detections: {}", self.out_of_order)?;
        writeln!(f, "Peak signal: {}", self.peak)?;

        if !self.device_counts.is_empty() {
            writeln!(f, "Detections per device:")?;
            let mut devices: Vec<_> = self.device_counts.iter().collect();
            devices.sort();
            for (device, count) in devices {
                writeln!(f, "  {}: {}", device, count)?;
            }
        }

        if !self.lap_seconds.is_empty() {
            writeln!(f, "Lap times (s):")?;
            let mut laps: Vec<_> = self.lap_seconds.iter().collect();
            laps.sort_by_key(|(frequency, _)| **frequency);
            for (frequency, stats) in laps {
                writeln!(f, "  {}mhz: {}", frequency, stats)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use contracts::DeviceId;

    fn event(device: &str, frequency: u32, offset_ms: i64, peak: i32) -> DetectionEvent {
        DetectionEvent {
            device: DeviceId::new(device),
            frequency,
            time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
                + Duration::milliseconds(offset_ms),
            peak,
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_lap_times() {
        let mut aggregator = DetectionMetricsAggregator::new();

        aggregator.update(&event("gate", 5658, 0, 40));
        aggregator.update(&event("gate", 5695, 1_000, 50));
        aggregator.update(&event("gate", 5658, 20_000, 60));
        aggregator.update(&event("gate", 5658, 41_000, 60));

        let summary = aggregator.summary();
        assert_eq!(summary.total_detections, 4);
        assert_eq!(summary.out_of_order, 0);
        assert_eq!(summary.device_counts.get("gate"), Some(&4));

        let laps = &summary.lap_seconds[&5658];
        assert_eq!(laps.count, 2);
        assert!((laps.mean - 20.5).abs() < 1e-9);
        assert!(!summary.lap_seconds.contains_key(&5695));
    }

    #[test]
    fn test_aggregator_counts_regressions_per_device() {
        let mut aggregator = DetectionMetricsAggregator::new();

        aggregator.update(&event("gate", 5658, 5_000, 40));
        aggregator.update(&event("split", 5658, 1_000, 40));
        aggregator.update(&event("gate", 5695, 4_000, 40));

        assert_eq!(aggregator.out_of_order, 1);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = DetectionMetricsAggregator::new();
        aggregator.update(&event("gate", 5658, 0, 40));

        let output = aggregator.summary().to_string();
        assert!(output.contains("Total detections: 1"));
        assert!(output.contains("gate: 1"));
    }
}
