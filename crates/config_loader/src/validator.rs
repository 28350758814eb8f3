//! 配置校验模块
//!
//! 校验规则：
//! - device id 非空且唯一
//! - 设备参数合法 (host/port/超时 > 0, channels >= 1)
//! - 频率在 1000..=10000 MHz, 灵敏度在 0..=2
//! - 频率不重复, 且不超过任一设备的通道数
//! - 赛段长度 >= 0
//! - sink 必填字段齐全

use std::collections::HashSet;

use contracts::{ContractError, SinkType, TimingConfig, TimingSystemSettings};
use validator::Validate;

/// 校验 TimingConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &TimingConfig) -> Result<(), ContractError> {
    validate_device_ids(config)?;
    validate_device_settings(config)?;
    validate_frequencies(config)?;
    validate_channel_capacity(config)?;
    validate_sectors(config)?;
    validate_sinks(config)?;
    Ok(())
}

/// 校验 device id 唯一性
fn validate_device_ids(config: &TimingConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (index, device) in config.devices.iter().enumerate() {
        if device.id.is_empty() {
            return Err(ContractError::config_validation(
                format!("devices[{index}].id"),
                "device id must not be empty",
            ));
        }
        if !seen.insert(device.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("devices[id={}]", device.id),
                "duplicate device id",
            ));
        }
    }
    Ok(())
}

/// 校验设备参数
fn validate_device_settings(config: &TimingConfig) -> Result<(), ContractError> {
    for device in &config.devices {
        device.settings.validate().map_err(|e| {
            ContractError::config_validation(format!("devices[{}].settings", device.id), e.to_string())
        })?;

        if device.sector_length_m < 0.0 || !device.sector_length_m.is_finite() {
            return Err(ContractError::config_validation(
                format!("devices[{}].sector_length_m", device.id),
                format!(
                    "sector_length_m must be >= 0, got {}",
                    device.sector_length_m
                ),
            ));
        }
    }
    Ok(())
}

/// 校验频率范围与唯一性
fn validate_frequencies(config: &TimingConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (index, frequency) in config.frequencies.iter().enumerate() {
        frequency.validate().map_err(|e| {
            ContractError::config_validation(format!("frequencies[{index}]"), e.to_string())
        })?;
        if !seen.insert(frequency.frequency) {
            return Err(ContractError::config_validation(
                format!("frequencies[{index}]"),
                format!("duplicate frequency {} MHz", frequency.frequency),
            ));
        }
    }
    Ok(())
}

/// 本地设备的通道数是固定的，配置的频率不能超过它
///
/// Socket 设备的通道数由设备心跳决定，启动时无法校验。
fn validate_channel_capacity(config: &TimingConfig) -> Result<(), ContractError> {
    let wanted = config.frequencies.len();
    for device in &config.devices {
        let channels = match &device.settings {
            TimingSystemSettings::Socket(_) => continue,
            TimingSystemSettings::Simulator(s) => s.channels,
            TimingSystemSettings::Video(s) => s.channels,
            TimingSystemSettings::Manual(s) => s.channels,
        };
        if wanted > channels {
            return Err(ContractError::config_validation(
                format!("devices[{}].settings.channels", device.id),
                format!("{wanted} frequencies configured but device has {channels} channels"),
            ));
        }
    }
    Ok(())
}

/// 校验赛段
fn validate_sectors(config: &TimingConfig) -> Result<(), ContractError> {
    for (index, sector) in config.sectors.iter().enumerate() {
        sector.validate().map_err(|e| {
            ContractError::config_validation(format!("sectors[{index}]"), e.to_string())
        })?;
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(config: &TimingConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (index, sink) in config.sinks.iter().enumerate() {
        if sink.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{index}].name"),
                "sink name must not be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "queue_capacity must be > 0",
            ));
        }

        match sink.sink_type {
            SinkType::Log => {}
            SinkType::File => {
                if !sink.params.contains_key("path") {
                    return Err(ContractError::config_validation(
                        format!("sinks[{}].params.path", sink.name),
                        "file sink requires 'path' parameter",
                    ));
                }
            }
        }
    }
    Ok(())
}
