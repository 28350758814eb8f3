//! Socket-connected timing device
//!
//! Owns one TCP link at a time. Inbound lines are decoded and routed to the
//! state they touch: pass records and node snapshots to the correlator,
//! heartbeats to the monitor, time replies to the synchronizer. Nothing here
//! waits on the network; every command only queues an outbound message.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clock_sync::{ClockSynchronizer, SyncStep};
use contracts::{
    to_seconds, DetectionObserver, DeviceFamily, DeviceId, ListeningFrequency, RssiReading, Role,
    SharedClock, SocketSettings, StatusItem, SubscriptionId, TimingSystem,
};
use correlator::{DetectionCorrelator, NodeSnapshot, PassRecord};
use dispatcher::DetectionBus;
use observability::metrics;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{DeviceError, Result};
use crate::link::{run_link, LinkClosed, LinkEvents, LinkTarget};
use crate::monitor::ConnectionMonitor;
use crate::protocol::{decode, EnvironmentData, Heartbeat, Inbound, Outbound, ServerInfo};

/// Channel count assumed before the first heartbeat
const DEFAULT_CHANNELS: usize = 4;
const RSSI_SCALE_MIN: f32 = 20.0;
const RSSI_SCALE_MAX: f32 = 200.0;

#[derive(Debug, Default)]
struct Telemetry {
    voltage: Option<f64>,
    temperature: Option<f64>,
    heartbeat: Option<Heartbeat>,
    server_info: Option<ServerInfo>,
    device_frequencies: Vec<u32>,
}

#[derive(Debug)]
struct SyncState {
    sync: ClockSynchronizer,
    /// `rejected_total` already reported to metrics
    rejected_reported: u64,
}

struct ActiveLink {
    generation: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

struct SocketInner {
    id: DeviceId,
    role: Role,
    settings: SocketSettings,
    clock: SharedClock,
    monitor: ConnectionMonitor,
    sync: Mutex<SyncState>,
    correlator: DetectionCorrelator,
    bus: DetectionBus,
    detecting: AtomicBool,
    telemetry: Mutex<Telemetry>,
    link: Mutex<Option<ActiveLink>>,
    /// Bumped on every connect and teardown; callbacks from older links are ignored
    generation: AtomicU64,
}

/// Timing device reached over a line-delimited JSON socket
pub struct SocketTimingSystem {
    inner: Arc<SocketInner>,
}

impl SocketTimingSystem {
    pub fn new(id: DeviceId, role: Role, settings: SocketSettings, clock: SharedClock) -> Self {
        let monitor = ConnectionMonitor::new(
            Arc::clone(&clock),
            Duration::from_millis(settings.heartbeat_timeout_ms),
        );
        let sync = ClockSynchronizer::new(settings.sync_window_ms as f64 / 1000.0);

        Self {
            inner: Arc::new(SocketInner {
                correlator: DetectionCorrelator::new(id.clone()),
                id,
                role,
                settings,
                clock,
                monitor,
                sync: Mutex::new(SyncState {
                    sync,
                    rejected_reported: 0,
                }),
                bus: DetectionBus::new(),
                detecting: AtomicBool::new(false),
                telemetry: Mutex::new(Telemetry::default()),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start a fresh clock-sync round on the live link
    pub fn resync(&self) -> bool {
        match self.inner.resync() {
            Ok(()) => true,
            Err(e) => {
                warn!(device = %self.inner.id, error = %e, "resync not started");
                false
            }
        }
    }

    /// Current epoch estimate (local seconds at device time zero)
    pub fn epoch(&self) -> Option<f64> {
        self.inner.lock_sync().sync.epoch()
    }

    pub fn is_detecting(&self) -> bool {
        self.inner.detecting.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u64 {
        self.inner.monitor.disconnect_count()
    }

    /// Last `ts_server_info` reply
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.lock_telemetry().server_info.clone()
    }

    /// Frequencies the device last reported via `frequency_data`
    pub fn device_frequencies(&self) -> Vec<u32> {
        self.inner.lock_telemetry().device_frequencies.clone()
    }

    /// Pass records waiting for a node snapshot
    pub fn pending_pass_records(&self) -> usize {
        self.inner.correlator.pending()
    }

    /// Drop the link after a failed send; caller must reconnect
    fn fail_link(&self, err: &DeviceError) {
        warn!(device = %self.inner.id, error = %err, "link dropped after send failure");
        self.inner.teardown(err.kind());
    }
}

impl TimingSystem for SocketTimingSystem {
    fn device_id(&self) -> &DeviceId {
        &self.inner.id
    }

    fn family(&self) -> DeviceFamily {
        DeviceFamily::Socket
    }

    fn role(&self) -> Role {
        self.inner.role
    }

    #[instrument(
        name = "socket_connect",
        skip(self),
        fields(device = %self.inner.id, address = %self.inner.settings.address())
    )]
    fn connect(&self) -> bool {
        self.check_timeout();

        let mut link = self.inner.lock_link();
        if link.is_some() {
            debug!("link already active or connecting");
            return true;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let err = DeviceError::NoRuntime {
                    device: self.inner.id.to_string(),
                };
                error!(error = %err, "connect refused");
                return false;
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *link = Some(ActiveLink { generation, tx });
        drop(link);

        let target = LinkTarget {
            address: self.inner.settings.address(),
            connect_timeout: Duration::from_millis(self.inner.settings.connect_timeout_ms),
        };
        handle.spawn(run_link(target, generation, rx, Arc::clone(&self.inner)));

        info!(generation, "connecting");
        true
    }

    #[instrument(name = "socket_disconnect", skip(self), fields(device = %self.inner.id))]
    fn disconnect(&self) -> bool {
        if self.inner.teardown("requested") {
            info!("disconnected");
        }
        true
    }

    fn is_link_live(&self) -> bool {
        self.inner.monitor.is_live()
    }

    fn check_timeout(&self) -> bool {
        self.inner.expire()
    }

    #[instrument(
        name = "socket_set_frequencies",
        skip(self, frequencies),
        fields(device = %self.inner.id, count = frequencies.len())
    )]
    fn set_listening_frequencies(&self, frequencies: &[ListeningFrequency]) -> bool {
        if !self.connected() {
            warn!("cannot assign frequencies, not connected");
            return false;
        }

        let pushed = self.inner.resync().and_then(|()| {
            for (node, frequency) in frequencies.iter().enumerate() {
                self.inner.send(Outbound::SetFrequency {
                    node,
                    frequency: frequency.frequency,
                })?;
            }
            Ok(())
        });

        match pushed {
            Ok(()) => {
                info!(frequencies = ?frequencies.iter().map(|f| f.frequency).collect::<Vec<_>>(), "frequencies assigned");
                true
            }
            Err(e) => {
                self.fail_link(&e);
                false
            }
        }
    }

    #[instrument(name = "socket_start_detection", skip(self), fields(device = %self.inner.id))]
    fn start_detection(&self, time: DateTime<Utc>) -> bool {
        if !self.connected() {
            warn!("cannot start detection, not connected");
            return false;
        }

        let cleared = self.inner.correlator.clear();
        if cleared > 0 {
            debug!(cleared, "stale pass records discarded");
        }
        metrics::record_buffer_depth(&self.inner.id, 0);

        let epoch = self.epoch();
        if epoch.is_none() {
            warn!("starting detection before the first clock sync");
        }
        let start_time_s = to_seconds(time) - epoch.unwrap_or(0.0);

        self.inner.detecting.store(true, Ordering::SeqCst);
        match self.inner.send(Outbound::RaceStage { start_time_s }) {
            Ok(()) => {
                info!(start_time_s, "detection started");
                true
            }
            Err(e) => {
                self.inner.detecting.store(false, Ordering::SeqCst);
                self.fail_link(&e);
                false
            }
        }
    }

    #[instrument(name = "socket_end_detection", skip(self), fields(device = %self.inner.id))]
    fn end_detection(&self) -> bool {
        if !self.connected() {
            return false;
        }
        if !self.inner.detecting.swap(false, Ordering::SeqCst) {
            debug!("detection was not active");
            return false;
        }

        match self.inner.send(Outbound::StopRace) {
            Ok(()) => {
                info!("detection ended");
                true
            }
            Err(e) => {
                self.fail_link(&e);
                false
            }
        }
    }

    fn max_pilots(&self) -> usize {
        self.inner
            .lock_telemetry()
            .heartbeat
            .as_ref()
            .map(|beat| beat.frequency.len())
            .filter(|channels| *channels > 0)
            .unwrap_or(DEFAULT_CHANNELS)
    }

    fn status(&self) -> Box<dyn Iterator<Item = StatusItem> + '_> {
        let mut items = Vec::with_capacity(4);
        {
            let telemetry = self.inner.lock_telemetry();
            if let Some(voltage) = telemetry.voltage {
                let value = format!("{voltage:.1}v");
                items.push(if voltage > self.inner.settings.voltage_warning {
                    StatusItem::ok(value)
                } else {
                    StatusItem::warning(value)
                });
            }
            if let Some(temperature) = telemetry.temperature {
                let value = format!("{temperature:.1}c");
                items.push(if temperature < self.inner.settings.temperature_warning {
                    StatusItem::ok(value)
                } else {
                    StatusItem::warning(value)
                });
            }
        }
        if items.is_empty() {
            items.push(StatusItem::unknown());
        }

        if self.inner.monitor.unstable() {
            items.push(StatusItem::warning(format!(
                "{} disc",
                self.inner.monitor.disconnect_count()
            )));
        }
        items.push(if self.is_link_live() {
            StatusItem::ok("connected")
        } else {
            StatusItem::warning("disconnected")
        });

        Box::new(items.into_iter())
    }

    fn rssi(&self) -> Vec<RssiReading> {
        let telemetry = self.inner.lock_telemetry();
        let Some(beat) = telemetry.heartbeat.as_ref() else {
            return Vec::new();
        };

        beat.frequency
            .iter()
            .zip(&beat.current_rssi)
            .zip(&beat.crossing_flag)
            .map(|((frequency, rssi), crossing)| RssiReading {
                frequency: *frequency,
                current_rssi: *rssi as f32,
                detected: *crossing,
                scale_min: RSSI_SCALE_MIN,
                scale_max: RSSI_SCALE_MAX,
            })
            .collect()
    }

    fn subscribe(&self, observer: DetectionObserver) -> SubscriptionId {
        self.inner.bus.subscribe(observer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }
}

impl SocketInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn send(&self, message: Outbound) -> Result<()> {
        let link = self.lock_link();
        let Some(active) = link.as_ref() else {
            return Err(DeviceError::not_connected(self.id.as_str()));
        };
        let event = message.event_name();
        active
            .tx
            .send(message)
            .map_err(|_| DeviceError::send_failed(self.id.as_str(), format!("link task gone ({event})")))
    }

    fn resync(&self) -> Result<()> {
        self.sync_step(|sync, now| {
            sync.begin_round(now);
            None
        });
        self.send(Outbound::ServerTimeRequest)
    }

    /// Run one synchronizer transition under its lock, then act on the result
    fn sync_step(&self, step: impl FnOnce(&mut ClockSynchronizer, f64) -> Option<SyncStep>) {
        let (step, rejected) = {
            let mut state = self.lock_sync();
            let now = self.clock.now_seconds();
            let step = step(&mut state.sync, now);
            let rejected = if matches!(step, Some(SyncStep::Committed(_) | SyncStep::Retained)) {
                let total = state.sync.rejected_total();
                let delta = total - state.rejected_reported;
                state.rejected_reported = total;
                delta
            } else {
                0
            };
            (step, rejected)
        };

        match step {
            Some(SyncStep::SendRequest) => {
                if let Err(e) = self.send(Outbound::ServerTimeRequest) {
                    debug!(device = %self.id, error = %e, "sync request not sent");
                }
            }
            Some(SyncStep::Committed(commit)) => {
                metrics::record_clock_sync_round(&self.id, "committed", rejected);
                if let Some(shift_ms) = commit.shift_ms() {
                    metrics::record_epoch_shift_ms(&self.id, shift_ms);
                }
            }
            Some(SyncStep::Retained) => {
                metrics::record_clock_sync_round(&self.id, "retained", rejected);
            }
            Some(SyncStep::Ignored) | None => {}
        }
    }

    /// Close the current link, if any. Returns whether the link was up.
    fn teardown(&self, reason: &str) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender makes the link task close the socket
        let had_link = self.lock_link().take().is_some();
        self.detecting.store(false, Ordering::SeqCst);
        self.lock_sync().sync.cancel();

        let was_up = self.monitor.mark_disconnected();
        if was_up {
            metrics::record_disconnect(&self.id, reason);
            metrics::record_link_state(&self.id, false);
        }
        had_link || was_up
    }

    fn expire(&self) -> bool {
        if !self.monitor.check_timeout() {
            return false;
        }
        metrics::record_disconnect(&self.id, "heartbeat_timeout");
        metrics::record_link_state(&self.id, false);
        self.teardown("heartbeat_timeout");
        true
    }

    fn handle(&self, message: Inbound) {
        match message {
            Inbound::PassRecord(record) => self.on_pass_record(record),
            Inbound::NodeData(snapshot) => self.on_node_data(&snapshot),
            Inbound::Heartbeat(beat) => {
                self.monitor.heartbeat();
                metrics::record_heartbeat(&self.id);
                self.lock_telemetry().heartbeat = Some(beat);
            }
            Inbound::Environment(blocks) => self.on_environment(&blocks),
            Inbound::ServerTime(device_time) => {
                self.sync_step(|sync, now| Some(sync.on_reply(device_time, now)));
            }
            Inbound::ServerInfo(server_info) => {
                info!(
                    device = %self.id,
                    release = ?server_info.release_version,
                    server_api = ?server_info.server_api,
                    "device server info"
                );
                self.lock_telemetry().server_info = Some(server_info);
            }
            Inbound::FrequencyData(data) => {
                let frequencies = data.frequencies();
                debug!(device = %self.id, ?frequencies, "device frequencies confirmed");
                self.lock_telemetry().device_frequencies = frequencies;
            }
            Inbound::Other(event) => {
                debug!(device = %self.id, event = %event, "unhandled event ignored");
            }
        }
    }

    fn on_pass_record(&self, record: PassRecord) {
        if !self.detecting.load(Ordering::SeqCst) {
            debug!(
                device = %self.id,
                node = record.node,
                "pass record outside detection ignored"
            );
            return;
        }
        let depth = self.correlator.push(record);
        metrics::record_pass_record(&self.id, depth);
    }

    fn on_node_data(&self, snapshot: &NodeSnapshot) {
        let epoch = self.lock_sync().sync.epoch();
        let events = self.correlator.on_snapshot(snapshot, epoch);
        if events.is_empty() {
            return;
        }
        metrics::record_buffer_depth(&self.id, self.correlator.pending());

        for event in &events {
            info!(
                device = %self.id,
                frequency = event.frequency,
                peak = event.peak,
                time = %event.time,
                "detection"
            );
            metrics::record_detection(&self.id, event.frequency, event.peak);
            self.bus.publish(event);
        }
    }

    fn on_environment(&self, blocks: &[EnvironmentData]) {
        let mut telemetry = self.lock_telemetry();
        for block in blocks {
            if let Some(voltage) = block.core.voltage {
                telemetry.voltage = Some(voltage.value);
            }
            if let Some(temperature) = block.core.temperature {
                telemetry.temperature = Some(temperature.value);
            }
        }
        trace!(
            device = %self.id,
            voltage = ?telemetry.voltage,
            temperature = ?telemetry.temperature,
            "environment"
        );
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<ActiveLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sync(&self) -> MutexGuard<'_, SyncState> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_telemetry(&self) -> MutexGuard<'_, Telemetry> {
        self.telemetry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LinkEvents for SocketInner {
    fn on_connected(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        self.monitor.mark_connected();
        metrics::record_link_state(&self.id, true);
        info!(device = %self.id, generation, "link established");

        let requested = self
            .send(Outbound::ServerInfoRequest)
            .and_then(|()| self.resync());
        if let Err(e) = requested {
            warn!(device = %self.id, error = %e, "initial requests not sent");
        }
    }

    fn on_line(&self, generation: u64, line: &str) {
        if !self.is_current(generation) {
            trace!(device = %self.id, generation, "line from stale link ignored");
            return;
        }

        match decode(line) {
            Ok(message) => self.handle(message),
            Err(e) => {
                let err = DeviceError::Malformed {
                    device: self.id.to_string(),
                    event: e.event().to_string(),
                    message: e.to_string(),
                };
                warn!(error = %err, "message dropped");
                metrics::record_malformed_message(&self.id, e.event());
                if e.event() == "ts_server_time" {
                    self.sync_step(|sync, now| Some(sync.on_malformed_reply(now)));
                }
            }
        }
    }

    fn on_tick(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        self.sync_step(|sync, now| sync.poll(now));
        self.expire();
    }

    fn on_closed(&self, generation: u64, reason: LinkClosed) {
        if !self.is_current(generation) {
            debug!(device = %self.id, generation, %reason, "stale link closed");
            return;
        }

        match reason {
            LinkClosed::ConnectFailed(_) | LinkClosed::ConnectTimeout => {
                let err = DeviceError::connect_failed(self.id.as_str(), reason.to_string());
                warn!(device = %self.id, error = %err, "connect attempt failed");
            }
            _ => warn!(device = %self.id, %reason, "link closed"),
        }
        self.teardown(reason.reason());
    }
}
