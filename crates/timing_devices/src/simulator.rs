//! Local simulated timing device
//!
//! Generates one pass record per assigned channel every lap interval (plus
//! jitter) and follows each batch with a node snapshot, feeding the same
//! correlator path a socket device uses. The device clock is the local
//! clock, so its epoch is exact: device time zero is the connect instant.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{
    to_seconds, DetectionObserver, DeviceFamily, DeviceId, ListeningFrequency, Role,
    SharedClock, SimulatorSettings, StatusItem, SubscriptionId, TimingSystem,
};
use correlator::{DetectionCorrelator, NodeSnapshot, PassRecord};
use observability::metrics;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, instrument};

use crate::local::LocalDevice;

/// How often the background task advances the simulation
const STEP_INTERVAL: Duration = Duration::from_millis(100);
const PEAK_MIN: i32 = 40;
const PEAK_MAX: i32 = 120;

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    /// Local seconds at device time zero
    epoch: Option<f64>,
    /// Next crossing per channel, local seconds
    next_pass: Vec<f64>,
}

#[derive(Debug)]
struct SimInner {
    device: LocalDevice,
    settings: SimulatorSettings,
    clock: SharedClock,
    correlator: DetectionCorrelator,
    state: Mutex<SimState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Simulated device
pub struct SimulatorTimingSystem {
    inner: Arc<SimInner>,
}

impl SimulatorTimingSystem {
    pub fn new(id: DeviceId, role: Role, settings: SimulatorSettings, clock: SharedClock) -> Self {
        Self::with_rng(id, role, settings, clock, StdRng::from_os_rng())
    }

    /// Deterministic lap jitter and peaks
    pub fn with_seed(
        id: DeviceId,
        role: Role,
        settings: SimulatorSettings,
        clock: SharedClock,
        seed: u64,
    ) -> Self {
        Self::with_rng(id, role, settings, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        id: DeviceId,
        role: Role,
        settings: SimulatorSettings,
        clock: SharedClock,
        rng: StdRng,
    ) -> Self {
        Self {
            inner: Arc::new(SimInner {
                correlator: DetectionCorrelator::new(id.clone()),
                device: LocalDevice::new(id, role, DeviceFamily::Simulator, settings.channels),
                settings,
                clock,
                state: Mutex::new(SimState {
                    rng,
                    epoch: None,
                    next_pass: Vec::new(),
                }),
                task: Mutex::new(None),
            }),
        }
    }

    /// Advance the simulation to the current clock time.
    ///
    /// Returns the number of detections published. Driven by a background
    /// task when a tokio runtime is available; callable directly otherwise.
    pub fn step(&self) -> usize {
        self.inner.step()
    }

    /// Local seconds at device time zero, set on connect
    pub fn epoch(&self) -> Option<f64> {
        self.inner.lock_state().epoch
    }
}

impl Drop for SimulatorTimingSystem {
    fn drop(&mut self) {
        self.inner.stop_task();
    }
}

impl TimingSystem for SimulatorTimingSystem {
    fn device_id(&self) -> &DeviceId {
        &self.inner.device.id
    }

    fn family(&self) -> DeviceFamily {
        DeviceFamily::Simulator
    }

    fn role(&self) -> Role {
        self.inner.device.role
    }

    #[instrument(name = "simulator_connect", skip(self), fields(device = %self.inner.device.id))]
    fn connect(&self) -> bool {
        if !self.inner.device.connect() {
            return true;
        }
        self.inner.lock_state().epoch = Some(self.inner.clock.now_seconds());

        match Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&self.inner);
                *self.inner.lock_task() = Some(handle.spawn(drive(weak)));
            }
            Err(_) => debug!("no runtime, simulation advances on step()"),
        }
        true
    }

    fn disconnect(&self) -> bool {
        self.inner.stop_task();
        self.inner.device.disconnect();
        true
    }

    fn is_link_live(&self) -> bool {
        self.inner.device.is_connected()
    }

    fn check_timeout(&self) -> bool {
        false
    }

    fn set_listening_frequencies(&self, frequencies: &[ListeningFrequency]) -> bool {
        self.inner.device.set_frequencies(frequencies)
    }

    #[instrument(name = "simulator_start_detection", skip(self), fields(device = %self.inner.device.id))]
    fn start_detection(&self, time: DateTime<Utc>) -> bool {
        if !self.inner.device.start(time) {
            return false;
        }
        self.inner.correlator.clear();

        let channels = self.inner.device.frequencies().len();
        let start = to_seconds(time);
        let mut state = self.inner.lock_state();
        let SimState { rng, next_pass, .. } = &mut *state;
        *next_pass = (0..channels)
            .map(|_| start + self.inner.next_lap(rng))
            .collect();
        true
    }

    fn end_detection(&self) -> bool {
        self.inner.device.end()
    }

    fn max_pilots(&self) -> usize {
        self.inner.device.channels
    }

    fn status(&self) -> Box<dyn Iterator<Item = StatusItem> + '_> {
        let laps = StatusItem::ok(format!(
            "{:.1}s laps",
            self.inner.settings.lap_interval_ms as f64 / 1000.0
        ));
        Box::new(self.inner.device.status_items().into_iter().chain(Some(laps)))
    }

    fn subscribe(&self, observer: DetectionObserver) -> SubscriptionId {
        self.inner.device.subscribe(observer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.device.unsubscribe(id)
    }
}

impl SimInner {
    /// Lap duration in seconds with jitter applied
    fn next_lap(&self, rng: &mut StdRng) -> f64 {
        let lap_ms = self.settings.lap_interval_ms as i64;
        let jitter_ms = self.settings.jitter_ms as i64;
        let jitter = if jitter_ms > 0 {
            rng.random_range(-jitter_ms..=jitter_ms)
        } else {
            0
        };
        (lap_ms + jitter).max(lap_ms / 2).max(1) as f64 / 1000.0
    }

    fn step(&self) -> usize {
        if !self.device.is_detecting() {
            return 0;
        }
        let now = self.clock.now_seconds();
        let frequencies = self.device.frequencies();

        let (epoch, snapshot) = {
            let mut state = self.lock_state();
            let Some(epoch) = state.epoch else {
                return 0;
            };
            let SimState { rng, next_pass, .. } = &mut *state;

            let mut crossed = false;
            for (node, frequency) in frequencies.iter().enumerate() {
                let Some(next) = next_pass.get_mut(node) else {
                    break;
                };
                while *next <= now {
                    let depth = self.correlator.push(PassRecord {
                        node,
                        frequency: frequency.frequency,
                        timestamp: (*next - epoch) * 1000.0,
                    });
                    metrics::record_pass_record(&self.device.id, depth);
                    *next += self.next_lap(rng);
                    crossed = true;
                }
            }
            if !crossed {
                return 0;
            }

            let peaks = (0..self.device.channels)
                .map(|_| rng.random_range(PEAK_MIN..=PEAK_MAX))
                .collect();
            let snapshot = NodeSnapshot {
                pass_peak_rssi: peaks,
            };
            (epoch, snapshot)
        };

        let events = self.correlator.on_snapshot(&snapshot, Some(epoch));
        metrics::record_buffer_depth(&self.device.id, self.correlator.pending());
        for event in &events {
            self.device.publish(event);
        }
        events.len()
    }

    fn stop_task(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background driver; ends when the device is dropped
async fn drive(inner: Weak<SimInner>) {
    let mut ticker = interval(STEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.step();
    }
}
