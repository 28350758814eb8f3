//! # Clock Sync
//!
//! 设备时钟同步：估计设备纪元 (device epoch) 在本地时间轴上的位置。
//!
//! 负责：
//! - 捕获窗口内的往返采样 (round-trip sampling)
//! - 以最低 RTT 样本为基准的离群剔除
//! - 窗口结束时取差值中位数作为新的纪元估计
//! - 丢弃属于上一轮请求的迟到回复
//!
//! All times are fractional Unix seconds (f64). The synchronizer never does
//! I/O itself: the caller sends a time request whenever a step asks for one.
//!
//! ## 使用示例
//!
//! ```ignore
//! use clock_sync::{ClockSynchronizer, SyncStep};
//!
//! let mut sync = ClockSynchronizer::new(1.0);
//! sync.begin_round(now);
//! send_time_request();
//!
//! match sync.on_reply(device_seconds, now) {
//!     SyncStep::SendRequest => send_time_request(),
//!     SyncStep::Committed(commit) => println!("epoch {}", commit.epoch),
//!     _ => {}
//! }
//! ```

mod sample;
mod synchronizer;

pub use sample::ClockSample;
pub use synchronizer::{ClockSynchronizer, EpochCommit, SyncStep};
