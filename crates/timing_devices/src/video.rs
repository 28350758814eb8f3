//! Crossings reported by an external frame analyser

use chrono::{DateTime, Duration, Utc};
use contracts::{
    DetectionEvent, DetectionObserver, DeviceFamily, DeviceId, ListeningFrequency, Role,
    StatusItem, SubscriptionId, TimingSystem, VideoSettings,
};
use tracing::{debug, instrument, warn};

use crate::local::LocalDevice;

/// Video-derived timing
///
/// The analyser identifies a pilot by channel index and reports the frame
/// the crossing happened on. Frame numbers count from detection start.
#[derive(Debug)]
pub struct VideoTimingSystem {
    device: LocalDevice,
    frame_rate: f64,
}

impl VideoTimingSystem {
    pub fn new(id: DeviceId, role: Role, settings: &VideoSettings) -> Self {
        Self {
            device: LocalDevice::new(id, role, DeviceFamily::Video, settings.channels),
            frame_rate: settings.frame_rate,
        }
    }

    /// Local time of a frame, relative to detection start.
    ///
    /// `None` when the frame lies outside the representable time range.
    pub fn frame_time(&self, start: DateTime<Utc>, frame_number: u64) -> Option<DateTime<Utc>> {
        let micros = (frame_number as f64 / self.frame_rate * 1_000_000.0).round() as i64;
        start.checked_add_signed(Duration::microseconds(micros))
    }

    /// Report a crossing. `confidence` in 0..=1 becomes the peak (0..=255).
    #[instrument(name = "video_report", skip(self), fields(device = %self.device.id))]
    pub fn report(&self, channel: usize, frame_number: u64, confidence: f32) -> bool {
        if !self.device.is_detecting() {
            debug!("report outside detection ignored");
            return false;
        }
        let Some(start) = self.device.detection_start() else {
            return false;
        };
        let Some(frequency) = self.device.frequency_at(channel) else {
            warn!(channel, "no frequency assigned to channel, crossing dropped");
            return false;
        };

        let Some(time) = self.frame_time(start, frame_number) else {
            warn!(frame_number, "frame number out of time range, crossing dropped");
            return false;
        };

        let peak = (confidence.clamp(0.0, 1.0) * 255.0).round() as i32;
        self.device.publish(&DetectionEvent {
            device: self.device.id.clone(),
            frequency,
            time,
            peak,
        });
        true
    }
}

impl TimingSystem for VideoTimingSystem {
    fn device_id(&self) -> &DeviceId {
        &self.device.id
    }

    fn family(&self) -> DeviceFamily {
        DeviceFamily::Video
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
        let fps = StatusItem::ok(format!("{:.0}fps", self.frame_rate));
        Box::new(self.device.status_items().into_iter().chain(Some(fps)))
    }

    fn subscribe(&self, observer: DetectionObserver) -> SubscriptionId {
        self.device.subscribe(observer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.device.unsubscribe(id)
    }
}
