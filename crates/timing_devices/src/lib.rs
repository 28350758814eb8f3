//! # Timing Devices
//!
//! 计时硬件接入层：每种硬件家族一个 `TimingSystem` 实现。
//!
//! - `socket`: 基于 TCP 行分隔 JSON 协议的网络设备，含时钟同步与心跳监控
//! - `simulator`: 本地模拟设备，按圈速生成 pass record + node snapshot
//! - `video`: 外部视频分析器上报的过线帧
//! - `manual`: 人工触发
//!
//! [`TimingSystemManager`] 按赛段顺序持有全部设备，统一连接、启停检测，
//! 并提供 [`distance_map::DistanceMap`] 与每设备状态汇总。

pub mod error;
pub mod factory;
pub mod link;
mod local;
pub mod manager;
pub mod manual;
pub mod monitor;
pub mod protocol;
pub mod simulator;
pub mod socket;
pub mod video;

pub use error::{DeviceError, Result};
pub use factory::{create_timing_system, DeviceHandle};
pub use manager::{DeviceResults, TimingSystemManager};
pub use manual::ManualTimingSystem;
pub use monitor::{ConnectionMonitor, DISCONNECT_WARNING_THRESHOLD};
pub use simulator::SimulatorTimingSystem;
pub use socket::SocketTimingSystem;
pub use video::VideoTimingSystem;
