//! Bridge orchestrator - drives every configured device from connect to shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{
    DetectionEvent, DetectionObserver, SharedClock, SystemClock, TimingConfig, TimingSystem,
};
use distance_map::DistanceMap;
use timing_devices::TimingSystemManager;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::BridgeStats;
use crate::error::CliError;

/// Poll period while waiting for links and clock sync
const SETTLE_POLL: Duration = Duration::from_millis(50);

/// Bound on the final sink flush
const DISPATCHER_DRAIN: Duration = Duration::from_secs(5);

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// The loaded timing configuration
    pub timing: TimingConfig,

    /// Stop detection after this long (None = until shutdown signal)
    pub duration: Option<Duration>,

    /// How long to wait for links (and first clock sync) before starting
    pub connect_wait: Duration,

    /// Heartbeat-timeout sweep period
    pub tick: Duration,

    /// Periodic status logging (None = disabled)
    pub status_interval: Option<Duration>,
}

/// Main bridge orchestrator
pub struct Bridge {
    config: BridgeConfig,
    clock: SharedClock,
}

impl Bridge {
    /// Create a bridge running on the system clock
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BridgeConfig, clock: SharedClock) -> Self {
        Self { config, clock }
    }

    /// Run until the duration elapses or `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<BridgeStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let timing = &self.config.timing;

        if timing.devices.is_empty() {
            return Err(CliError::NoDevices.into());
        }

        let manager = TimingSystemManager::from_config(timing, Arc::clone(&self.clock));
        let distance = manager.distance_map();
        info!(
            devices = manager.len(),
            frequencies = manager.frequencies().len(),
            has_distance = distance.has_distance(),
            "Timing systems created"
        );

        // Fan every device's detections into one channel
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<DetectionEvent>();
        let observer: DetectionObserver = Arc::new(move |event: &DetectionEvent| {
            let _ = event_tx.send(event.clone());
        });
        let subscriptions = manager.subscribe_all(observer);

        // Setup Dispatcher
        let (sink_tx, sink_rx) = mpsc::unbounded_channel::<DetectionEvent>();
        if timing.sinks.is_empty() {
            warn!("No sinks configured - detections will only be counted");
        }
        let dispatcher = dispatcher::create_dispatcher(timing.sinks.clone(), sink_rx)
            .context("Failed to create dispatcher")?;
        let dispatcher_handle = dispatcher.spawn();
        info!(sinks = timing.sinks.len(), "Dispatcher started");

        let mut stats = BridgeStats::default();

        // Connect
        manager.connect_all();
        let links_up = settle(self.config.connect_wait, || manager.all_connected()).await;
        stats.connected_devices = manager
            .devices()
            .iter()
            .filter(|device| device.system().is_link_live())
            .count();
        if !links_up {
            warn!(
                connected = stats.connected_devices,
                total = manager.len(),
                "Not every device connected in time"
            );
        }

        if stats.connected_devices == 0 {
            manager.disconnect_all();
            drop(sink_tx);
            let _ = tokio::time::timeout(DISPATCHER_DRAIN, dispatcher_handle).await;
            return Err(CliError::no_devices_connected(
                manager.len(),
                self.config.connect_wait.as_millis() as u64,
            )
            .into());
        }

        // Assign frequencies, then let the resync they trigger settle
        manager.apply_frequencies();
        let synced = settle(self.config.connect_wait, || clocks_synced(&manager)).await;
        if !synced {
            warn!("Clock sync incomplete, detections may be offset");
        }

        let detection_start = self.clock.now();
        stats.detecting_devices = manager
            .start_all(detection_start)
            .iter()
            .filter(|(_, ok)| *ok)
            .count();

        info!(
            duration = ?self.config.duration,
            detecting = stats.detecting_devices,
            "Bridge running"
        );

        let mut tick = tokio::time::interval(self.config.tick);
        let mut status_tick = self.config.status_interval.map(tokio::time::interval);
        let deadline = async {
            match self.config.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    if !record(&mut stats, &manager, &distance, &sink_tx, event) {
                        warn!("Dispatcher channel closed");
                        break;
                    }
                }
                _ = tick.tick() => {
                    for device in manager.check_timeouts() {
                        stats.timeouts += 1;
                        warn!(device = %device, "Heartbeat timeout, link dropped");
                    }
                }
                _ = next_status(&mut status_tick) => {
                    log_status(&manager);
                }
                _ = &mut deadline => {
                    info!("Run duration reached");
                    break;
                }
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping detection...");
                    break;
                }
            }
        }

        // Shutdown
        info!("Shutting down bridge...");
        manager.end_all();
        while let Ok(event) = event_rx.try_recv() {
            record(&mut stats, &manager, &distance, &sink_tx, event);
        }

        for (device, subscription) in subscriptions {
            if let Some(handle) = manager.get(&device) {
                handle.system().unsubscribe(subscription);
            }
        }
        stats.device_status = manager.status();
        manager.disconnect_all();

        // Closing the only sender lets the dispatcher drain and exit
        drop(sink_tx);
        stats.sink_metrics = match tokio::time::timeout(DISPATCHER_DRAIN, dispatcher_handle).await
        {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(e)) => {
                warn!(error = %e, "Dispatcher task failed");
                Vec::new()
            }
            Err(_) => {
                warn!("Dispatcher did not drain in time");
                Vec::new()
            }
        };

        stats.duration = start_time.elapsed();
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            detections = stats.detections,
            "Bridge shutdown complete"
        );

        Ok(stats)
    }
}

/// Count one detection and forward it to the sinks; `false` once the
/// dispatcher is gone
fn record(
    stats: &mut BridgeStats,
    manager: &TimingSystemManager,
    distance: &DistanceMap,
    sink_tx: &mpsc::UnboundedSender<DetectionEvent>,
    event: DetectionEvent,
) -> bool {
    stats.detections += 1;
    stats.detection_metrics.update(&event);

    let distance_m = manager
        .index_of(&event.device)
        .and_then(|index| distance.distance(index));
    debug!(
        device = %event.device,
        frequency = event.frequency,
        peak = event.peak,
        distance_m = ?distance_m,
        "Detection forwarded"
    );

    sink_tx.send(event).is_ok()
}

/// Poll `ready` until it holds or `wait` elapses
async fn settle(wait: Duration, ready: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        if ready() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
}

/// Every live socket device has committed an epoch
fn clocks_synced(manager: &TimingSystemManager) -> bool {
    manager
        .devices()
        .iter()
        .filter_map(|device| device.as_socket())
        .filter(|socket| socket.is_link_live())
        .all(|socket| socket.epoch().is_some())
}

async fn next_status(status_tick: &mut Option<tokio::time::Interval>) {
    match status_tick {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_status(manager: &TimingSystemManager) {
    for (device, readout) in manager.status() {
        if readout.ok {
            info!(device = %device, status = %readout.value, "Device status");
        } else {
            warn!(device = %device, status = %readout.value, "Device status");
        }
    }
    for handle in manager.devices() {
        let system = handle.system();
        let rssi = system.rssi();
        if !rssi.is_empty() {
            debug!(device = %system.device_id(), channels = rssi.len(), rssi = ?rssi, "RSSI");
        }
    }
}
