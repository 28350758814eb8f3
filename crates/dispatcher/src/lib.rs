//! # Dispatcher
//!
//! 检测事件分发模块。
//!
//! 负责：
//! - `DetectionBus`: 每个设备的观察者注册表，每个订阅者都收到每个事件
//! - 消费 `DetectionEvent`
//! - Fan-out 到多个 sinks
//! - 隔离慢 sink，不阻塞设备链路

pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use bus::DetectionBus;
pub use contracts::{DetectionEvent, DetectionSink};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{FileSink, LogSink};
