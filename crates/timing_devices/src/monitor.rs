//! Heartbeat-driven link liveness

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use contracts::SharedClock;
use tracing::{debug, warn};

/// Lifetime disconnects above this are shown as a status warning
pub const DISCONNECT_WARNING_THRESHOLD: u64 = 10;

/// Per-device connection state machine
///
/// `Disconnected --connect--> Connected`; every heartbeat refreshes the
/// timestamp and reasserts `Connected`. Liveness is never cached: it is
/// recomputed from `now - last_heartbeat` on every read. All state is
/// atomic so reads never contend with the telemetry feed.
#[derive(Debug)]
pub struct ConnectionMonitor {
    clock: SharedClock,
    timeout_micros: i64,
    last_heartbeat_micros: AtomicI64,
    link_up: AtomicBool,
    disconnects: AtomicU64,
}

impl ConnectionMonitor {
    pub fn new(clock: SharedClock, timeout: Duration) -> Self {
        Self {
            clock,
            timeout_micros: i64::try_from(timeout.as_micros()).unwrap_or(i64::MAX),
            last_heartbeat_micros: AtomicI64::new(0),
            link_up: AtomicBool::new(false),
            disconnects: AtomicU64::new(0),
        }
    }

    fn now_micros(&self) -> i64 {
        self.clock.now().timestamp_micros()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_micros.max(0) as u64)
    }

    /// Link established: start the timeout from now
    pub fn mark_connected(&self) {
        self.last_heartbeat_micros
            .store(self.now_micros(), Ordering::SeqCst);
        self.link_up.store(true, Ordering::SeqCst);
    }

    /// Accepted heartbeat
    pub fn heartbeat(&self) {
        self.last_heartbeat_micros
            .store(self.now_micros(), Ordering::SeqCst);
        if !self.link_up.swap(true, Ordering::SeqCst) {
            debug!("heartbeat reasserted link");
        }
    }

    /// Pure read: link up and last heartbeat within the timeout
    pub fn is_live(&self) -> bool {
        self.link_up.load(Ordering::SeqCst) && !self.expired()
    }

    fn expired(&self) -> bool {
        let elapsed = self.now_micros() - self.last_heartbeat_micros.load(Ordering::SeqCst);
        elapsed > self.timeout_micros
    }

    /// Take the link down if the heartbeat expired.
    ///
    /// Returns `true` for exactly one caller per expiry, however many
    /// threads race on it.
    pub fn check_timeout(&self) -> bool {
        if !self.link_up.load(Ordering::SeqCst) || !self.expired() {
            return false;
        }
        if self
            .link_up
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let count = self.disconnects.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            timeout_ms = self.timeout().as_millis() as u64,
            disconnects = count,
            "heartbeat timeout, link down"
        );
        true
    }

    /// Link closed for any other reason; `true` if it was up
    pub fn mark_disconnected(&self) -> bool {
        if self.link_up.swap(false, Ordering::SeqCst) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Link state flag, ignoring heartbeat age
    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u64 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Whether the disconnect count has crossed the warning threshold
    pub fn unstable(&self) -> bool {
        self.disconnect_count() > DISCONNECT_WARNING_THRESHOLD
    }
}
