//! # Contracts
//!
//! Frozen interface contracts shared by every timing crate.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Local absolute time is `DateTime<Utc>` at the boundary
//! - Internally, clock arithmetic uses fractional Unix seconds (f64)
//! - Device timestamps are relative to the device epoch and are translated
//!   through a per-device epoch estimate

mod clock;
mod config;
mod detection;
mod device_id;
mod error;
mod frequency;
mod sink;
mod status;
mod timing_system;

pub use clock::{from_seconds, to_seconds, Clock, ManualClock, SharedClock, SystemClock};
pub use config::*;
pub use detection::*;
pub use device_id::DeviceId;
pub use error::*;
pub use frequency::ListeningFrequency;
pub use sink::*;
pub use status::*;
pub use timing_system::{DeviceFamily, TimingSystem};
