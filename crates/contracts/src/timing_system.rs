//! TimingSystem trait - uniform capability contract over timing hardware
//!
//! Every hardware family (socket device, local simulator, video-derived,
//! manual) implements this trait so the race-control collaborator can drive
//! them identically.
//!
//! # Design Principles
//!
//! 1. **Never throws**: every operation answers `bool`; failures are logged at
//!    the boundary and surface as `false` or a disconnected link.
//! 2. **Never blocks on I/O**: requests are issued and the call returns with
//!    an "accepted" answer; outcomes arrive through detections and status.
//! 3. **Observer registry**: detections fan out to every subscriber.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    DetectionObserver, DeviceId, ListeningFrequency, RssiReading, Role, StatusItem,
    SubscriptionId,
};

/// Hardware family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Networked device speaking the event protocol over a socket
    Socket,
    /// Local simulated device
    Simulator,
    /// Crossings derived from video frame analysis
    Video,
    /// Crossings entered by hand
    Manual,
}

impl DeviceFamily {
    /// Short label for status displays
    pub fn acronym(self) -> &'static str {
        match self {
            DeviceFamily::Socket => "SKT",
            DeviceFamily::Simulator => "SIM",
            DeviceFamily::Video => "V",
            DeviceFamily::Manual => "MAN",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceFamily::Socket => "socket",
            DeviceFamily::Simulator => "simulator",
            DeviceFamily::Video => "video",
            DeviceFamily::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Timing system capability contract
pub trait TimingSystem: Send + Sync {
    /// Device identifier
    fn device_id(&self) -> &DeviceId;

    /// Hardware family
    fn family(&self) -> DeviceFamily;

    /// Primary gate or split
    fn role(&self) -> Role;

    /// Establish the link.
    ///
    /// Idempotent. On success an immediate clock-sync round is scheduled.
    /// Bounded: the attempt itself runs in the background with a timeout.
    fn connect(&self) -> bool;

    /// Gracefully close the link. Safe to call repeatedly.
    fn disconnect(&self) -> bool;

    /// Pure read of link liveness (last heartbeat within timeout).
    fn is_link_live(&self) -> bool;

    /// Timeout check: when the heartbeat has expired, tear the link down.
    ///
    /// Returns `true` only on the call that performed the disconnect.
    fn check_timeout(&self) -> bool;

    /// Link state, self-healing on read.
    ///
    /// Runs [`TimingSystem::check_timeout`] first, so reading an expired link
    /// both answers `false` and disconnects it (exactly once).
    fn connected(&self) -> bool {
        self.check_timeout();
        self.is_link_live()
    }

    /// Push one assignment per channel index, in order.
    ///
    /// `false` means the caller must reconnect before retrying.
    fn set_listening_frequencies(&self, frequencies: &[ListeningFrequency]) -> bool;

    /// Begin accepting telemetry; clears stale buffered pass records.
    ///
    /// `false` if not connected.
    fn start_detection(&self, time: DateTime<Utc>) -> bool;

    /// Stop accepting telemetry; `false` if detection was not active.
    fn end_detection(&self) -> bool;

    /// Number of receiver channels
    fn max_pilots(&self) -> usize;

    /// Lazily produced status items. Pure read, never fails.
    fn status(&self) -> Box<dyn Iterator<Item = StatusItem> + '_>;

    /// Live per-channel signal readout, empty when unsupported
    fn rssi(&self) -> Vec<RssiReading> {
        Vec::new()
    }

    /// Register a detection observer
    fn subscribe(&self, observer: DetectionObserver) -> SubscriptionId;

    /// Remove a detection observer; `false` if the id was unknown
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}
