//! Joins pass records with node snapshots into detection events.

use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::{from_seconds, to_seconds, DetectionEvent, DeviceId};
use tracing::{debug, instrument, warn};

use crate::{NodeSnapshot, PassBuffer, PassRecord};

#[derive(Debug, Default)]
struct EmitState {
    /// Latest emitted local time (seconds)
    last_emitted: Option<f64>,
    /// Batches whose first event went back in time
    regressions: u64,
    emitted_total: u64,
}

/// Per-device correlator
///
/// Appends and drains are serialized on the buffer mutex, so a record is
/// either in the buffer or in exactly one drained batch.
#[derive(Debug)]
pub struct DetectionCorrelator {
    device: DeviceId,
    buffer: Mutex<PassBuffer>,
    state: Mutex<EmitState>,
}

impl DetectionCorrelator {
    pub fn new(device: DeviceId) -> Self {
        Self::with_buffer(device, PassBuffer::default())
    }

    pub fn with_buffer(device: DeviceId, buffer: PassBuffer) -> Self {
        Self {
            device,
            buffer: Mutex::new(buffer),
            state: Mutex::new(EmitState::default()),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Buffer a raw pass record, returning the buffer depth
    pub fn push(&self, record: PassRecord) -> usize {
        let depth = self.lock_buffer().push(record);
        debug!(
            device = %self.device,
            node = record.node,
            frequency = record.frequency,
            timestamp = record.timestamp,
            depth,
            "pass record buffered"
        );
        depth
    }

    /// Discard buffered records (detection restart)
    pub fn clear(&self) -> usize {
        let dropped = self.lock_buffer().clear();
        if dropped > 0 {
            debug!(device = %self.device, dropped, "stale pass records cleared");
        }
        dropped
    }

    /// Records still waiting for a snapshot
    pub fn pending(&self) -> usize {
        self.lock_buffer().len()
    }

    /// Total events produced so far
    pub fn emitted_total(&self) -> u64 {
        self.lock_state().emitted_total
    }

    /// Records emitted with a time earlier than one already emitted
    pub fn regressions(&self) -> u64 {
        self.lock_state().regressions
    }

    /// Drain the buffer against a snapshot.
    ///
    /// `epoch` is the device epoch in local seconds. Every drained record
    /// yields exactly one event, in the order the records arrived.
    #[instrument(
        name = "correlator_snapshot",
        skip(self, snapshot),
        fields(device = %self.device, channels = snapshot.pass_peak_rssi.len())
    )]
    pub fn on_snapshot(&self, snapshot: &NodeSnapshot, epoch: Option<f64>) -> Vec<DetectionEvent> {
        let records = self.lock_buffer().drain();
        if records.is_empty() {
            return Vec::new();
        }

        let epoch = epoch.unwrap_or_else(|| {
            warn!(
                records = records.len(),
                "no clock epoch yet, device timestamps used as-is"
            );
            0.0
        });

        let events: Vec<DetectionEvent> = records
            .iter()
            .map(|record| self.to_event(record, snapshot, epoch))
            .collect();

        self.track_ordering(&events);
        events
    }

    fn to_event(&self, record: &PassRecord, snapshot: &NodeSnapshot, epoch: f64) -> DetectionEvent {
        let peak = snapshot.peak(record.node);
        if record.node >= snapshot.pass_peak_rssi.len() {
            debug!(node = record.node, "pass record channel outside snapshot, peak 0");
        }

        DetectionEvent {
            device: self.device.clone(),
            frequency: record.frequency,
            time: from_seconds(epoch + record.timestamp / 1000.0),
            peak,
        }
    }

    /// Emission order is the device's; regressions are counted, never fixed up
    fn track_ordering(&self, events: &[DetectionEvent]) {
        let mut state = self.lock_state();
        for event in events {
            let time = to_seconds(event.time);
            match state.last_emitted {
                Some(latest) if time < latest => {
                    state.regressions += 1;
                    warn!(
                        device = %self.device,
                        behind_ms = (latest - time) * 1000.0,
                        "detection earlier than one already emitted"
                    );
                }
                _ => state.last_emitted = Some(time),
            }
        }
        state.emitted_total += events.len() as u64;
    }

    fn lock_buffer(&self) -> MutexGuard<'_, PassBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, EmitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
