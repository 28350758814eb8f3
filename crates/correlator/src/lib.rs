//! # Correlator
//!
//! 将两路异步遥测合并为完成的检测事件：
//! - pass records (立即上报，尚无信号强度)
//! - node snapshots (较慢的独立节奏，携带每通道峰值)
//!
//! Each snapshot drains every buffered pass record and annotates it with
//! the peak of its channel, translating device time through the current
//! epoch estimate.

mod buffer;
mod correlator;
mod record;

pub use buffer::PassBuffer;
pub use correlator::DetectionCorrelator;
pub use record::{NodeSnapshot, PassRecord};
