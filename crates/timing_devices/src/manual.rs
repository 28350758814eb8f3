//! Hand-entered crossings

use chrono::{DateTime, Utc};
use contracts::{
    DetectionEvent, DetectionObserver, DeviceFamily, DeviceId, ListeningFrequency, ManualSettings,
    Role, StatusItem, SubscriptionId, TimingSystem,
};
use tracing::{debug, instrument};

use crate::local::LocalDevice;

/// Timing "device" driven by an operator pressing a button per crossing
#[derive(Debug)]
pub struct ManualTimingSystem {
    device: LocalDevice,
}

impl ManualTimingSystem {
    pub fn new(id: DeviceId, role: Role, settings: &ManualSettings) -> Self {
        Self {
            device: LocalDevice::new(id, role, DeviceFamily::Manual, settings.channels),
        }
    }

    /// Inject one crossing. Accepted only while detecting.
    #[instrument(name = "manual_trigger", skip(self), fields(device = %self.device.id))]
    pub fn trigger(&self, frequency: u32, time: DateTime<Utc>, peak: i32) -> bool {
        if !self.device.is_detecting() {
            debug!("trigger outside detection ignored");
            return false;
        }

        self.device.publish(&DetectionEvent {
            device: self.device.id.clone(),
            frequency,
            time,
            peak,
        });
        true
    }
}

impl TimingSystem for ManualTimingSystem {
    fn device_id(&self) -> &DeviceId {
        &self.device.id
    }

    fn family(&self) -> DeviceFamily {
        DeviceFamily::Manual
    }

    fn role(&self) -> Role {
        self.device.role
    }

    fn connect(&self) -> bool {
        self.device.connect();
        true
    }

    fn disconnect(&self) -> bool {
        self.device.disconnect();
        true
    }

    fn is_link_live(&self) -> bool {
        self.device.is_connected()
    }

    fn check_timeout(&self) -> bool {
        false
    }

    fn set_listening_frequencies(&self, frequencies: &[ListeningFrequency]) -> bool {
        self.device.set_frequencies(frequencies)
    }

    fn start_detection(&self, time: DateTime<Utc>) -> bool {
        self.device.start(time)
    }

    fn end_detection(&self) -> bool {
        self.device.end()
    }

    fn max_pilots(&self) -> usize {
        self.device.channels
    }

    fn status(&self) -> Box<dyn Iterator<Item = StatusItem> + '_> {
        Box::new(self.device.status_items().into_iter())
    }

    fn subscribe(&self, observer: DetectionObserver) -> SubscriptionId {
        self.device.subscribe(observer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.device.unsubscribe(id)
    }
}
