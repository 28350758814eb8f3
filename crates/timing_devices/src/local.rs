//! State shared by the in-process device families (simulator, video, manual)
//!
//! These devices have no wire link: "connected" is a flag set by
//! `connect()`, and detections are published straight onto the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use contracts::{
    DetectionEvent, DetectionObserver, DeviceFamily, DeviceId, ListeningFrequency, Role,
    StatusItem, SubscriptionId,
};
use dispatcher::DetectionBus;
use observability::metrics;
use tracing::{debug, info, warn};

use crate::error::DeviceError;

#[derive(Debug)]
pub(crate) struct LocalDevice {
    pub(crate) id: DeviceId,
    pub(crate) role: Role,
    pub(crate) family: DeviceFamily,
    pub(crate) channels: usize,
    connected: AtomicBool,
    detecting: AtomicBool,
    frequencies: Mutex<Vec<ListeningFrequency>>,
    detection_start: Mutex<Option<DateTime<Utc>>>,
    bus: DetectionBus,
}

impl LocalDevice {
    pub(crate) fn new(id: DeviceId, role: Role, family: DeviceFamily, channels: usize) -> Self {
        Self {
            id,
            role,
            family,
            channels,
            connected: AtomicBool::new(false),
            detecting: AtomicBool::new(false),
            frequencies: Mutex::new(Vec::new()),
            detection_start: Mutex::new(None),
            bus: DetectionBus::new(),
        }
    }

    /// Returns `true` if this call brought the device up
    pub(crate) fn connect(&self) -> bool {
        let newly = !self.connected.swap(true, Ordering::SeqCst);
        if newly {
            metrics::record_link_state(&self.id, true);
            info!(device = %self.id, family = %self.family, "connected");
        }
        newly
    }

    /// Returns `true` if this call took the device down
    pub(crate) fn disconnect(&self) -> bool {
        self.detecting.store(false, Ordering::SeqCst);
        let was_up = self.connected.swap(false, Ordering::SeqCst);
        if was_up {
            metrics::record_disconnect(&self.id, "requested");
            metrics::record_link_state(&self.id, false);
            info!(device = %self.id, family = %self.family, "disconnected");
        }
        was_up
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn is_detecting(&self) -> bool {
        self.detecting.load(Ordering::SeqCst)
    }

    pub(crate) fn set_frequencies(&self, frequencies: &[ListeningFrequency]) -> bool {
        if !self.is_connected() {
            warn!(device = %self.id, "cannot assign frequencies, not connected");
            return false;
        }
        if frequencies.len() > self.channels {
            let err = DeviceError::invalid_state(
                self.id.as_str(),
                "set_listening_frequencies",
                format!("{} frequencies for {} channels", frequencies.len(), self.channels),
            );
            warn!(error = %err, "frequencies rejected");
            return false;
        }

        *self.lock_frequencies() = frequencies.to_vec();
        debug!(device = %self.id, count = frequencies.len(), "frequencies assigned");
        true
    }

    pub(crate) fn frequencies(&self) -> Vec<ListeningFrequency> {
        self.lock_frequencies().clone()
    }

    /// Frequency assigned to a channel index
    pub(crate) fn frequency_at(&self, channel: usize) -> Option<u32> {
        self.lock_frequencies().get(channel).map(|f| f.frequency)
    }

    pub(crate) fn start(&self, time: DateTime<Utc>) -> bool {
        if !self.is_connected() {
            warn!(device = %self.id, "cannot start detection, not connected");
            return false;
        }
        *self.lock_start() = Some(time);
        self.detecting.store(true, Ordering::SeqCst);
        info!(device = %self.id, start = %time, "detection started");
        true
    }

    pub(crate) fn end(&self) -> bool {
        if !self.is_connected() || !self.detecting.swap(false, Ordering::SeqCst) {
            return false;
        }
        info!(device = %self.id, "detection ended");
        true
    }

    pub(crate) fn detection_start(&self) -> Option<DateTime<Utc>> {
        *self.lock_start()
    }

    pub(crate) fn publish(&self, event: &DetectionEvent) {
        info!(
            device = %self.id,
            frequency = event.frequency,
            peak = event.peak,
            time = %event.time,
            "detection"
        );
        metrics::record_detection(&self.id, event.frequency, event.peak);
        self.bus.publish(event);
    }

    pub(crate) fn subscribe(&self, observer: DetectionObserver) -> SubscriptionId {
        self.bus.subscribe(observer)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Family label plus link state
    pub(crate) fn status_items(&self) -> Vec<StatusItem> {
        vec![
            StatusItem::ok(self.family.acronym()),
            if self.is_connected() {
                StatusItem::ok("connected")
            } else {
                StatusItem::warning("disconnected")
            },
        ]
    }

    fn lock_frequencies(&self) -> MutexGuard<'_, Vec<ListeningFrequency>> {
        self.frequencies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_start(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.detection_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
