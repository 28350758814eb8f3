//! Status surface types

use serde::{Deserialize, Serialize};

/// One line of device status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusItem {
    /// Short human-readable value, e.g. "7.4v"
    pub value: String,

    /// False when the item is in a warning state
    pub ok: bool,
}

impl StatusItem {
    pub fn ok(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ok: true,
        }
    }

    pub fn warning(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ok: false,
        }
    }

    /// Placeholder used when a device has not reported anything yet
    pub fn unknown() -> Self {
        Self::ok("unknown")
    }
}

/// Single persistent readout for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReadout {
    pub value: String,
    pub ok: bool,
}

impl StatusReadout {
    /// Pick the worst current item.
    ///
    /// The first failing item wins; otherwise the first item is shown with
    /// `ok` mirroring the link state. Returns `None` for an empty sequence.
    pub fn worst<I>(items: I, connected: bool) -> Option<Self>
    where
        I: IntoIterator<Item = StatusItem>,
    {
        let mut first = None;
        for item in items {
            if !item.ok {
                return Some(Self {
                    value: item.value,
                    ok: false,
                });
            }
            if first.is_none() {
                first = Some(item);
            }
        }

        first.map(|item| Self {
            value: item.value,
            ok: connected,
        })
    }
}

/// Live signal reading for one receiver channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RssiReading {
    pub frequency: u32,
    pub current_rssi: f32,
    pub detected: bool,
    pub scale_min: f32,
    pub scale_max: f32,
}
