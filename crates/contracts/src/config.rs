//! TimingConfig - Config Loader 输出
//!
//! 描述完整的计时配置：设备、频道、赛段、输出路由。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::{DeviceFamily, DeviceId, ListeningFrequency};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的计时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// Logging / metrics defaults (CLI flags override)
    #[serde(default)]
    pub observability: ObservabilitySettings,

    /// Timing devices, in sector order
    pub devices: Vec<DeviceConfig>,

    /// Ordered channel assignments, position = channel index
    #[serde(default)]
    pub frequencies: Vec<ListeningFrequency>,

    /// Ordered track sectors
    #[serde(default)]
    pub sectors: Vec<Sector>,

    /// 输出路由配置
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl TimingConfig {
    /// Configured sector lengths in track order
    pub fn sector_lengths(&self) -> Vec<f64> {
        self.sectors.iter().map(|sector| sector.length_m).collect()
    }

    /// Look up a device by id
    pub fn device(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|device| device.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus exporter port, 0 disables
    #[serde(default)]
    pub metrics_port: u16,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_port: 0,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 单个计时设备配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 唯一标识符
    pub id: DeviceId,

    #[serde(default)]
    pub role: Role,

    /// Length of the sector ending at this device (0 = unknown)
    #[serde(default)]
    pub sector_length_m: f64,

    /// 设备类型特定参数
    pub settings: TimingSystemSettings,
}

/// Position of a device on the track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Start/finish gate
    #[default]
    Primary,
    /// Intermediate split gate
    Split,
}

/// Family-specific settings, one variant per hardware family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimingSystemSettings {
    Socket(SocketSettings),
    Simulator(SimulatorSettings),
    Video(VideoSettings),
    Manual(ManualSettings),
}

impl TimingSystemSettings {
    pub fn family(&self) -> DeviceFamily {
        match self {
            TimingSystemSettings::Socket(_) => DeviceFamily::Socket,
            TimingSystemSettings::Simulator(_) => DeviceFamily::Simulator,
            TimingSystemSettings::Video(_) => DeviceFamily::Video,
            TimingSystemSettings::Manual(_) => DeviceFamily::Manual,
        }
    }

    /// Run the field-level rules of the active variant
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            TimingSystemSettings::Socket(s) => s.validate(),
            TimingSystemSettings::Simulator(s) => s.validate(),
            TimingSystemSettings::Video(s) => s.validate(),
            TimingSystemSettings::Manual(s) => s.validate(),
        }
    }
}

/// Networked device speaking the JSON-lines event protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SocketSettings {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1))]
    pub port: u16,

    /// Link is considered dead after this long without a heartbeat
    #[serde(default = "default_heartbeat_timeout_ms")]
    #[validate(range(min = 1))]
    pub heartbeat_timeout_ms: u64,

    /// Clock-sync capture window
    #[serde(default = "default_sync_window_ms")]
    #[validate(range(min = 1))]
    pub sync_window_ms: u64,

    /// Connect attempt bound
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    /// Voltage at or below this is a warning
    #[serde(default = "default_voltage_warning")]
    pub voltage_warning: f64,

    /// Temperature at or above this is a warning
    #[serde(default = "default_temperature_warning")]
    pub temperature_warning: f64,
}

impl SocketSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            sync_window_ms: default_sync_window_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            voltage_warning: default_voltage_warning(),
            temperature_warning: default_temperature_warning(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_sync_window_ms() -> u64 {
    1_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_voltage_warning() -> f64 {
    7.0
}

fn default_temperature_warning() -> f64 {
    70.0
}

/// Local simulated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SimulatorSettings {
    #[serde(default = "default_channels")]
    #[validate(range(min = 1, max = 16))]
    pub channels: usize,

    /// Mean lap time per pilot
    #[serde(default = "default_lap_interval_ms")]
    #[validate(range(min = 100))]
    pub lap_interval_ms: u64,

    /// Uniform +/- jitter added to each lap
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            lap_interval_ms: default_lap_interval_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_lap_interval_ms() -> u64 {
    20_000
}

fn default_jitter_ms() -> u64 {
    2_000
}

/// Crossings reported by an external frame analyser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct VideoSettings {
    #[serde(default = "default_frame_rate")]
    #[validate(range(min = 1.0))]
    pub frame_rate: f64,

    #[serde(default = "default_channels")]
    #[validate(range(min = 1, max = 16))]
    pub channels: usize,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            channels: default_channels(),
        }
    }
}

fn default_frame_rate() -> f64 {
    60.0
}

/// Crossings entered by hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ManualSettings {
    #[serde(default = "default_channels")]
    #[validate(range(min = 1, max = 16))]
    pub channels: usize,
}

impl Default for ManualSettings {
    fn default() -> Self {
        Self {
            channels: default_channels(),
        }
    }
}

fn default_channels() -> usize {
    4
}

/// One track sector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct Sector {
    /// Length in meters (0 = unknown)
    #[validate(range(min = 0.0))]
    pub length_m: f64,
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink 名称
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出
    Log,
    /// 文件输出 (JSON lines)
    File,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_tagged_by_family() {
        let json = r#"{"type":"socket","host":"10.0.0.2","port":5000}"#;
        let settings: TimingSystemSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.family(), DeviceFamily::Socket);
        let TimingSystemSettings::Socket(socket) = settings else {
            panic!("expected socket settings");
        };
        assert_eq!(socket.heartbeat_timeout_ms, 10_000);
        assert_eq!(socket.sync_window_ms, 1_000);
        assert_eq!(socket.address(), "10.0.0.2:5000");
    }

    #[test]
    fn test_settings_unknown_family_rejected() {
        let json = r#"{"type":"manual","channels":2}"#;
        let settings: TimingSystemSettings = serde_json::from_str(json).unwrap();
        assert_eq!(
            settings,
            TimingSystemSettings::Manual(ManualSettings { channels: 2 })
        );

        assert!(serde_json::from_str::<TimingSystemSettings>(r#"{"type":"laser"}"#).is_err());
    }

    #[test]
    fn test_settings_validation_dispatches_to_variant() {
        let mut socket = SocketSettings::new("host", 5000);
        assert!(TimingSystemSettings::Socket(socket.clone()).validate().is_ok());

        socket.heartbeat_timeout_ms = 0;
        assert!(TimingSystemSettings::Socket(socket).validate().is_err());

        let video = VideoSettings {
            frame_rate: 0.0,
            channels: 4,
        };
        assert!(TimingSystemSettings::Video(video).validate().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let json = r#"{
            "devices": [
                {"id": "gate", "settings": {"type": "simulator"}}
            ]
        }"#;
        let config: TimingConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.version, ConfigVersion::V1);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.devices[0].role, Role::Primary);
        assert!(config.device("gate").is_some());
        assert!(config.frequencies.is_empty());
        assert!(config.sector_lengths().is_empty());
    }
}
