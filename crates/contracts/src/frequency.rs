//! ListeningFrequency - one channel assignment
//!
//! Passed in channel order to `TimingSystem::set_listening_frequencies`;
//! position in the list is the channel index.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Frequency assignment for a single receiver channel
///
/// Two assignments are equal when they listen on the same frequency,
/// regardless of sensitivity or pilot.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ListeningFrequency {
    /// Frequency in MHz (e.g. 5880 for Raceband 7)
    #[validate(range(min = 1000, max = 10000))]
    pub frequency: u32,

    /// Sensitivity factor, 1.0 is the device default
    #[serde(default = "default_sensitivity")]
    #[validate(range(min = 0.0, max = 2.0))]
    pub sensitivity: f32,

    /// Pilot label (may be empty)
    #[serde(default)]
    pub pilot: String,
}

fn default_sensitivity() -> f32 {
    1.0
}

impl ListeningFrequency {
    /// Assignment without a pilot label
    pub fn new(frequency: u32, sensitivity: f32) -> Self {
        Self::for_pilot("", frequency, sensitivity)
    }

    /// Assignment labelled with a pilot
    pub fn for_pilot(pilot: impl Into<String>, frequency: u32, sensitivity: f32) -> Self {
        Self {
            frequency,
            sensitivity,
            pilot: pilot.into(),
        }
    }
}

impl PartialEq for ListeningFrequency {
    fn eq(&self, other: &Self) -> bool {
        self.frequency == other.frequency
    }
}

impl Eq for ListeningFrequency {}

impl Hash for ListeningFrequency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.frequency.hash(state)
    }
}

impl fmt::Display for ListeningFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mhz({}%)", self.frequency, self.sensitivity * 100.0)
    }
}
