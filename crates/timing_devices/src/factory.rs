//! Builds timing systems from configuration

use std::sync::Arc;

use contracts::{DeviceConfig, SharedClock, TimingSystem, TimingSystemSettings};
use tracing::{info, instrument};

use crate::manual::ManualTimingSystem;
use crate::simulator::SimulatorTimingSystem;
use crate::socket::SocketTimingSystem;
use crate::video::VideoTimingSystem;

/// A configured device, keeping its concrete family reachable
///
/// Manual and video devices take input through family-specific calls
/// (`trigger`, `report`) that the shared contract does not carry.
#[derive(Clone)]
pub enum DeviceHandle {
    Socket(Arc<SocketTimingSystem>),
    Simulator(Arc<SimulatorTimingSystem>),
    Video(Arc<VideoTimingSystem>),
    Manual(Arc<ManualTimingSystem>),
}

impl DeviceHandle {
    /// The device behind the common contract
    pub fn system(&self) -> &dyn TimingSystem {
        match self {
            DeviceHandle::Socket(device) => device.as_ref(),
            DeviceHandle::Simulator(device) => device.as_ref(),
            DeviceHandle::Video(device) => device.as_ref(),
            DeviceHandle::Manual(device) => device.as_ref(),
        }
    }

    /// Shared owner of the device behind the common contract
    pub fn shared(&self) -> Arc<dyn TimingSystem> {
        match self {
            DeviceHandle::Socket(device) => device.clone(),
            DeviceHandle::Simulator(device) => device.clone(),
            DeviceHandle::Video(device) => device.clone(),
            DeviceHandle::Manual(device) => device.clone(),
        }
    }

    pub fn as_manual(&self) -> Option<&ManualTimingSystem> {
        match self {
            DeviceHandle::Manual(device) => Some(device),
            _ => None,
        }
    }

    pub fn as_video(&self) -> Option<&VideoTimingSystem> {
        match self {
            DeviceHandle::Video(device) => Some(device),
            _ => None,
        }
    }

    pub fn as_socket(&self) -> Option<&SocketTimingSystem> {
        match self {
            DeviceHandle::Socket(device) => Some(device),
            _ => None,
        }
    }
}

/// Create the timing system a device entry describes
#[instrument(
    name = "create_timing_system",
    skip(config, clock),
    fields(device = %config.id, family = %config.settings.family())
)]
pub fn create_timing_system(config: &DeviceConfig, clock: SharedClock) -> DeviceHandle {
    let id = config.id.clone();
    let handle = match &config.settings {
        TimingSystemSettings::Socket(settings) => DeviceHandle::Socket(Arc::new(
            SocketTimingSystem::new(id, config.role, settings.clone(), clock),
        )),
        TimingSystemSettings::Simulator(settings) => DeviceHandle::Simulator(Arc::new(
            SimulatorTimingSystem::new(id, config.role, settings.clone(), clock),
        )),
        TimingSystemSettings::Video(settings) => {
            DeviceHandle::Video(Arc::new(VideoTimingSystem::new(id, config.role, settings)))
        }
        TimingSystemSettings::Manual(settings) => {
            DeviceHandle::Manual(Arc::new(ManualTimingSystem::new(id, config.role, settings)))
        }
    };

    info!(role = ?config.role, "timing system created");
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        DeviceFamily, DeviceId, ManualSettings, Role, SimulatorSettings, SocketSettings,
        SystemClock,
    };

    fn config(settings: TimingSystemSettings) -> DeviceConfig {
        DeviceConfig {
            id: DeviceId::new("dev"),
            role: Role::Split,
            sector_length_m: 0.0,
            settings,
        }
    }

    #[test]
    fn test_family_follows_settings() {
        let clock: SharedClock = Arc::new(SystemClock);
        let cases = [
            (
                TimingSystemSettings::Socket(SocketSettings::new("10.0.0.2", 5000)),
                DeviceFamily::Socket,
            ),
            (
                TimingSystemSettings::Simulator(SimulatorSettings {
                    channels: 2,
                    lap_interval_ms: 1000,
                    jitter_ms: 0,
                }),
                DeviceFamily::Simulator,
            ),
            (
                TimingSystemSettings::Manual(ManualSettings { channels: 8 }),
                DeviceFamily::Manual,
            ),
        ];

        for (settings, family) in cases {
            let handle = create_timing_system(&config(settings), Arc::clone(&clock));
            assert_eq!(handle.system().family(), family);
            assert_eq!(handle.system().role(), Role::Split);
            assert_eq!(handle.system().device_id(), "dev");
        }
    }

    #[test]
    fn test_family_accessors() {
        let clock: SharedClock = Arc::new(SystemClock);
        let handle = create_timing_system(
            &config(TimingSystemSettings::Manual(ManualSettings { channels: 8 })),
            clock,
        );

        assert!(handle.as_manual().is_some());
        assert!(handle.as_video().is_none());
        assert!(handle.as_socket().is_none());
        assert_eq!(handle.shared().max_pilots(), 8);
    }
}
