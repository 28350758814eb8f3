//! Owns every configured timing system, in sector order

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use contracts::{
    DetectionObserver, DeviceId, ListeningFrequency, Role, SharedClock, StatusReadout,
    SubscriptionId, TimingConfig,
};
use distance_map::DistanceMap;
use tracing::{info, instrument, warn};

use crate::factory::{create_timing_system, DeviceHandle};

/// Outcome of a fan-out command, per device
pub type DeviceResults = Vec<(DeviceId, bool)>;

/// Drives all configured devices as one timing installation
pub struct TimingSystemManager {
    devices: Vec<DeviceHandle>,
    sector_lengths: Vec<f64>,
    frequencies: Vec<ListeningFrequency>,
}

impl TimingSystemManager {
    pub fn new(
        devices: Vec<DeviceHandle>,
        sector_lengths: Vec<f64>,
        frequencies: Vec<ListeningFrequency>,
    ) -> Self {
        Self {
            devices,
            sector_lengths,
            frequencies,
        }
    }

    /// Build every device in the configuration.
    ///
    /// Sector lengths come from `sectors` when present, otherwise from each
    /// device's `sector_length_m`.
    #[instrument(
        name = "timing_manager_from_config",
        skip(config, clock),
        fields(devices = config.devices.len())
    )]
    pub fn from_config(config: &TimingConfig, clock: SharedClock) -> Self {
        let devices = config
            .devices
            .iter()
            .map(|device| create_timing_system(device, clock.clone()))
            .collect();

        let mut manager = Self::new(devices, Vec::new(), config.frequencies.clone());
        manager.sector_lengths = if config.sectors.is_empty() {
            manager
                .sector_indices()
                .into_iter()
                .filter_map(|index| config.devices.get(index))
                .map(|device| device.sector_length_m)
                .collect()
        } else {
            config.sector_lengths()
        };
        manager
    }

    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn frequencies(&self) -> &[ListeningFrequency] {
        &self.frequencies
    }

    pub fn get(&self, id: &str) -> Option<&DeviceHandle> {
        self.devices
            .iter()
            .find(|device| device.system().device_id() == id)
    }

    /// Position of a device in the configured order
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.devices
            .iter()
            .position(|device| device.system().device_id() == id)
    }

    /// Device indices in track order: primary gates first, then splits
    pub fn sector_indices(&self) -> Vec<usize> {
        let (primary, split): (Vec<_>, Vec<_>) = self
            .devices
            .iter()
            .enumerate()
            .partition(|(_, device)| device.system().role() == Role::Primary);

        primary
            .into_iter()
            .chain(split)
            .map(|(index, _)| index)
            .collect()
    }

    /// Sector length per device index
    pub fn distance_map(&self) -> DistanceMap {
        DistanceMap::new(&self.sector_indices(), &self.sector_lengths)
    }

    #[instrument(name = "timing_manager_connect_all", skip(self))]
    pub fn connect_all(&self) -> DeviceResults {
        self.for_each(|device| device.system().connect())
    }

    #[instrument(name = "timing_manager_disconnect_all", skip(self))]
    pub fn disconnect_all(&self) -> DeviceResults {
        self.for_each(|device| device.system().disconnect())
    }

    /// Push the configured frequencies to every device
    #[instrument(name = "timing_manager_set_frequencies", skip(self))]
    pub fn apply_frequencies(&self) -> DeviceResults {
        self.for_each(|device| device.system().set_listening_frequencies(&self.frequencies))
    }

    #[instrument(name = "timing_manager_start_all", skip(self))]
    pub fn start_all(&self, time: DateTime<Utc>) -> DeviceResults {
        let results = self.for_each(|device| device.system().start_detection(time));
        let started = results.iter().filter(|(_, ok)| *ok).count();
        info!(started, total = results.len(), start = %time, "detection started");
        results
    }

    #[instrument(name = "timing_manager_end_all", skip(self))]
    pub fn end_all(&self) -> DeviceResults {
        self.for_each(|device| device.system().end_detection())
    }

    /// Register one observer on every device
    pub fn subscribe_all(&self, observer: DetectionObserver) -> Vec<(DeviceId, SubscriptionId)> {
        self.devices
            .iter()
            .map(|device| {
                let system = device.system();
                (system.device_id().clone(), system.subscribe(observer.clone()))
            })
            .collect()
    }

    /// Run the heartbeat-timeout check on every device.
    ///
    /// Returns the devices this sweep disconnected.
    pub fn check_timeouts(&self) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter(|device| device.system().check_timeout())
            .map(|device| device.system().device_id().clone())
            .collect()
    }

    /// Whether every device reports a live link
    pub fn all_connected(&self) -> bool {
        self.devices.iter().all(|device| device.system().connected())
    }

    /// Worst status item per device
    pub fn status(&self) -> HashMap<DeviceId, StatusReadout> {
        self.devices
            .iter()
            .filter_map(|device| {
                let system = device.system();
                let connected = system.connected();
                StatusReadout::worst(system.status(), connected)
                    .map(|readout| (system.device_id().clone(), readout))
            })
            .collect()
    }

    fn for_each(&self, command: impl Fn(&DeviceHandle) -> bool) -> DeviceResults {
        self.devices
            .iter()
            .map(|device| {
                let ok = command(device);
                let id = device.system().device_id().clone();
                if !ok {
                    warn!(device = %id, "command not accepted");
                }
                (id, ok)
            })
            .collect()
    }
}
