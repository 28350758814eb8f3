//! DetectionEvent - the only output downstream consumers see

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// A finished, timestamped gate crossing
///
/// Immutable once emitted. `time` is already translated into the local
/// time base through the device's epoch estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Device that produced the detection
    pub device: DeviceId,

    /// Frequency in MHz
    pub frequency: u32,

    /// Absolute local time of the crossing
    pub time: DateTime<Utc>,

    /// Peak signal strength for the pass (0 when unknown)
    pub peak: i32,
}

/// Detection observer callback
///
/// Invoked synchronously on the publishing task; observers that need to do
/// real work should forward into a channel.
pub type DetectionObserver = Arc<dyn Fn(&DetectionEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);
