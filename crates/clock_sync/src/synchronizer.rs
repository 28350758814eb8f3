//! Capture-window clock synchronizer.

use tracing::{debug, info, warn};

use crate::ClockSample;

/// What the caller should do after feeding the synchronizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncStep {
    /// Window still open: issue another time request now
    SendRequest,
    /// Window closed with surviving samples; epoch replaced
    Committed(EpochCommit),
    /// Window closed with no surviving samples; previous epoch kept
    Retained,
    /// Reply did not belong to the current round
    Ignored,
}

/// Result of a committed round
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochCommit {
    /// New epoch (local seconds at device time zero)
    pub epoch: f64,
    /// Epoch it replaced, if any
    pub previous: Option<f64>,
    /// Samples that survived outlier rejection
    pub samples: usize,
}

impl EpochCommit {
    /// Shift relative to the previous estimate, in milliseconds
    pub fn shift_ms(&self) -> Option<f64> {
        self.previous.map(|previous| (self.epoch - previous) * 1000.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Round {
    started_at: f64,
    /// Send time of the request currently awaiting a reply
    pending_send: Option<f64>,
    /// Replies still owed to requests sent before this round began
    stale: u32,
}

/// Estimates the device-to-local clock offset
///
/// A round is started on demand ([`ClockSynchronizer::begin_round`]) and runs
/// for a fixed capture window. Each reply becomes a [`ClockSample`]; after
/// every sample the set is sorted by ascending round trip, and the best
/// sample's `[differential - rtt, differential + rtt]` band evicts outliers.
/// When the window elapses the median differential of the survivors replaces
/// the epoch wholesale (lower-middle element for even counts).
///
/// Replies carry no request id, so the synchronizer counts requests it has
/// asked for against replies received. Replies arrive in request order; those
/// owed to an earlier round are discarded before the new round pairs any.
#[derive(Debug)]
pub struct ClockSynchronizer {
    window_s: f64,
    round: Option<Round>,
    samples: Vec<ClockSample>,
    epoch: Option<f64>,
    /// Requests sent and not yet answered, across rounds
    outstanding: u32,
    rejected_total: u64,
    rounds_committed: u64,
}

impl ClockSynchronizer {
    /// Create a synchronizer with the given capture window (seconds)
    pub fn new(window_s: f64) -> Self {
        Self {
            window_s,
            round: None,
            samples: Vec::new(),
            epoch: None,
            outstanding: 0,
            rejected_total: 0,
            rounds_committed: 0,
        }
    }

    /// Current epoch estimate
    pub fn epoch(&self) -> Option<f64> {
        self.epoch
    }

    /// Whether a capture window is open
    pub fn is_syncing(&self) -> bool {
        self.round.is_some()
    }

    /// Samples currently surviving in the open round
    pub fn samples(&self) -> &[ClockSample] {
        &self.samples
    }

    /// Total samples evicted by the acceptance band
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total
    }

    /// Total rounds that replaced the epoch
    pub fn rounds_committed(&self) -> u64 {
        self.rounds_committed
    }

    /// Requests still awaiting a reply
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Start a new capture window at `now` and record the first request.
    ///
    /// Any in-flight samples of a previous round are discarded, and replies
    /// owed to its requests will be skipped. The caller must send a time
    /// request immediately after.
    pub fn begin_round(&mut self, now: f64) {
        if self.round.is_some() {
            debug!(
                dropped = self.samples.len(),
                in_flight = self.outstanding,
                "restarting clock sync round"
            );
        }
        self.samples.clear();
        self.round = Some(Round {
            started_at: now,
            pending_send: Some(now),
            stale: self.outstanding,
        });
        self.outstanding += 1;
    }

    /// Feed a time reply carrying the device's seconds-since-epoch.
    pub fn on_reply(&mut self, device_time: f64, now: f64) -> SyncStep {
        if !self.take_answer() {
            return SyncStep::Ignored;
        }
        let Some(round) = self.round.as_mut() else {
            debug!(device_time, "time reply outside a sync round, ignoring");
            return SyncStep::Ignored;
        };
        if round.stale > 0 {
            round.stale -= 1;
            debug!(device_time, "time reply to an earlier round, ignoring");
            return SyncStep::Ignored;
        }
        let Some(sent) = round.pending_send.take() else {
            debug!(device_time, "unsolicited time reply, ignoring");
            return SyncStep::Ignored;
        };
        if now < sent {
            debug!(device_time, "time reply older than its request, ignoring");
            return SyncStep::Ignored;
        }

        self.samples.push(ClockSample::new(sent, now, device_time));
        self.reject_outliers();

        self.advance(now)
    }

    /// A reply arrived but could not be decoded.
    ///
    /// The window keeps running; a fresh request is asked for if it is open.
    pub fn on_malformed_reply(&mut self, now: f64) -> SyncStep {
        if !self.take_answer() {
            return SyncStep::Ignored;
        }
        let Some(round) = self.round.as_mut() else {
            return SyncStep::Ignored;
        };
        if round.stale > 0 {
            round.stale -= 1;
            return SyncStep::Ignored;
        }
        round.pending_send = None;
        warn!("malformed time reply dropped");

        self.advance(now)
    }

    /// Close the window once its deadline has passed, even without replies.
    pub fn poll(&mut self, now: f64) -> Option<SyncStep> {
        let round = self.round?;
        if now - round.started_at < self.window_s {
            return None;
        }
        Some(self.finish())
    }

    /// Abandon the open round without touching the epoch.
    ///
    /// Used when the link goes away, so no earlier reply can still arrive.
    pub fn cancel(&mut self) {
        self.round = None;
        self.samples.clear();
        self.outstanding = 0;
    }

    /// Count one reply against the requests sent; `false` if none was owed
    fn take_answer(&mut self) -> bool {
        if self.outstanding == 0 {
            debug!("unsolicited time reply, ignoring");
            return false;
        }
        self.outstanding -= 1;
        true
    }

    fn advance(&mut self, now: f64) -> SyncStep {
        match self.round.as_mut() {
            Some(round) if now - round.started_at < self.window_s => {
                round.pending_send = Some(now);
                self.outstanding += 1;
                SyncStep::SendRequest
            }
            Some(_) => self.finish(),
            None => SyncStep::Ignored,
        }
    }

    /// Sort by round trip and evict samples outside the best sample's band.
    fn reject_outliers(&mut self) {
        self.samples
            .sort_by(|a, b| a.round_trip().total_cmp(&b.round_trip()));

        let Some(best) = self.samples.first().copied() else {
            return;
        };
        let min = best.differential() - best.round_trip();
        let max = best.differential() + best.round_trip();

        let before = self.samples.len();
        self.samples.retain(|sample| {
            let diff = sample.differential();
            diff >= min && diff <= max
        });

        let rejected = before - self.samples.len();
        if rejected > 0 {
            self.rejected_total += rejected as u64;
            debug!(rejected, kept = self.samples.len(), "clock samples outside acceptance band");
        }
    }

    fn finish(&mut self) -> SyncStep {
        self.round = None;
        let mut samples = std::mem::take(&mut self.samples);

        if samples.is_empty() {
            warn!(epoch = ?self.epoch, "clock sync round produced no samples, keeping epoch");
            return SyncStep::Retained;
        }

        samples.sort_by(|a, b| a.differential().total_cmp(&b.differential()));
        let epoch = samples[(samples.len() - 1) / 2].differential();

        let commit = EpochCommit {
            epoch,
            previous: self.epoch.replace(epoch),
            samples: samples.len(),
        };
        self.rounds_committed += 1;

        info!(
            epoch,
            samples = commit.samples,
            shift_ms = ?commit.shift_ms(),
            "clock sync committed"
        );
        SyncStep::Committed(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRUE_EPOCH: f64 = 1_700_000_000.0;

    /// Reply for a request sent at `sent` with the given outbound/inbound delays
    fn reply(sync: &mut ClockSynchronizer, sent: f64, out: f64, back: f64) -> SyncStep {
        let device_time = sent + out - TRUE_EPOCH;
        sync.on_reply(device_time, sent + out + back)
    }

    #[test]
    fn test_reply_without_round_is_ignored() {
        let mut sync = ClockSynchronizer::new(1.0);
        assert_eq!(sync.on_reply(10.0, TRUE_EPOCH + 10.0), SyncStep::Ignored);
        assert!(sync.epoch().is_none());
    }

    #[test]
    fn test_rejects_outlier_and_commits_close_to_truth() {
        let mut sync = ClockSynchronizer::new(1.0);
        let start = TRUE_EPOCH + 100.0;
        sync.begin_round(start);

        // Symmetric samples with different delays
        let mut now = start;
        for delay in [0.010, 0.004, 0.020, 0.006] {
            assert_eq!(reply(&mut sync, now, delay, delay), SyncStep::SendRequest);
            now += 2.0 * delay;
        }

        // Asymmetric outlier: 200ms stuck on the way back with a long RTT
        assert_eq!(reply(&mut sync, now, 0.001, 0.400), SyncStep::SendRequest);
        assert!(sync
            .samples()
            .iter()
            .all(|sample| sample.round_trip() < 0.1));
        assert_eq!(sync.rejected_total(), 1);

        let step = sync.poll(start + 1.0).unwrap();
        let SyncStep::Committed(commit) = step else {
            panic!("expected commit, got {step:?}");
        };

        // Minimum observed RTT is 8ms
        assert!((commit.epoch - TRUE_EPOCH).abs() <= 0.004);
        assert_eq!(commit.previous, None);
        assert!(!sync.is_syncing());
        assert_eq!(sync.epoch(), Some(commit.epoch));
    }

    #[test]
    fn test_median_takes_lower_middle() {
        let mut sync = ClockSynchronizer::new(1.0);
        let start = TRUE_EPOCH;
        sync.begin_round(start);

        // Device clock readings chosen so differentials are 0ms, +2ms, +4ms, +6ms
        // around the true epoch, all within the best sample's band.
        let rtt = 0.020;
        let mut now = start;
        for offset in [0.006, 0.000, 0.004, 0.002] {
            let device_time = now + rtt / 2.0 - TRUE_EPOCH - offset;
            sync.on_reply(device_time, now + rtt);
            now += rtt;
        }

        let step = sync.poll(start + 1.0).unwrap();
        let SyncStep::Committed(commit) = step else {
            panic!("expected commit, got {step:?}");
        };
        assert_eq!(commit.samples, 4);
        assert!((commit.epoch - (TRUE_EPOCH + 0.002)).abs() < 1e-5);
    }

    #[test]
    fn test_empty_round_retains_previous_epoch() {
        let mut sync = ClockSynchronizer::new(1.0);
        sync.begin_round(TRUE_EPOCH);
        reply(&mut sync, TRUE_EPOCH, 0.002, 0.002);
        sync.poll(TRUE_EPOCH + 1.0);
        let first = sync.epoch().unwrap();

        // New round where the device never answers
        sync.begin_round(TRUE_EPOCH + 50.0);
        assert_eq!(sync.poll(TRUE_EPOCH + 50.5), None);
        assert_eq!(sync.poll(TRUE_EPOCH + 51.0), Some(SyncStep::Retained));
        assert_eq!(sync.epoch(), Some(first));
    }

    #[test]
    fn test_new_round_replaces_not_blends() {
        let mut sync = ClockSynchronizer::new(0.5);
        sync.begin_round(TRUE_EPOCH);
        reply(&mut sync, TRUE_EPOCH, 0.001, 0.001);
        sync.poll(TRUE_EPOCH + 0.5);
        // Answer to the request issued just before the window closed
        assert_eq!(sync.on_reply(0.6, TRUE_EPOCH + 0.6), SyncStep::Ignored);
        assert_eq!(sync.outstanding(), 0);

        // Device clock restarted: epoch moves by 30s
        let start = TRUE_EPOCH + 60.0;
        sync.begin_round(start);
        let device_time = start + 0.001 - (TRUE_EPOCH + 30.0);
        sync.on_reply(device_time, start + 0.002);
        let Some(SyncStep::Committed(commit)) = sync.poll(start + 0.5) else {
            panic!("expected commit");
        };

        assert!((commit.epoch - (TRUE_EPOCH + 30.0)).abs() < 1e-5);
        assert!((commit.shift_ms().unwrap() - 30_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_malformed_reply_keeps_window_running() {
        let mut sync = ClockSynchronizer::new(1.0);
        sync.begin_round(TRUE_EPOCH);

        assert_eq!(sync.on_malformed_reply(TRUE_EPOCH + 0.01), SyncStep::SendRequest);
        assert_eq!(
            reply(&mut sync, TRUE_EPOCH + 0.01, 0.002, 0.002),
            SyncStep::SendRequest
        );
        assert_eq!(sync.samples().len(), 1);
    }

    #[test]
    fn test_reply_owed_to_previous_round_is_skipped() {
        let mut sync = ClockSynchronizer::new(1.0);
        sync.begin_round(TRUE_EPOCH);

        // Restart 250ms later while the first request is still unanswered
        let restart = TRUE_EPOCH + 0.250;
        sync.begin_round(restart);
        assert_eq!(sync.outstanding(), 2);

        // Late answer to the first request: device read 1ms past the epoch
        assert_eq!(sync.on_reply(0.001, restart + 0.050), SyncStep::Ignored);
        assert!(sync.samples().is_empty());

        // Answer to the restart request pairs with its own send time
        let device_time = restart + 0.005 - TRUE_EPOCH;
        assert_eq!(sync.on_reply(device_time, restart + 0.060), SyncStep::SendRequest);
        assert_eq!(sync.samples().len(), 1);

        let Some(SyncStep::Committed(commit)) = sync.poll(restart + 1.0) else {
            panic!("expected commit");
        };
        assert!((commit.epoch - TRUE_EPOCH).abs() <= 0.030);
    }

    #[test]
    fn test_cancel_forgets_outstanding_requests() {
        let mut sync = ClockSynchronizer::new(1.0);
        sync.begin_round(TRUE_EPOCH);
        sync.cancel();
        assert_eq!(sync.outstanding(), 0);

        sync.begin_round(TRUE_EPOCH + 5.0);
        assert_eq!(
            reply(&mut sync, TRUE_EPOCH + 5.0, 0.002, 0.002),
            SyncStep::SendRequest
        );
        assert_eq!(sync.samples().len(), 1);
    }

    #[test]
    fn test_stale_reply_after_window_is_ignored() {
        let mut sync = ClockSynchronizer::new(1.0);
        sync.begin_round(TRUE_EPOCH);
        reply(&mut sync, TRUE_EPOCH, 0.002, 0.002);
        let committed = sync.poll(TRUE_EPOCH + 1.0);
        assert!(matches!(committed, Some(SyncStep::Committed(_))));

        let epoch = sync.epoch();
        assert_eq!(sync.on_reply(999.0, TRUE_EPOCH + 1.2), SyncStep::Ignored);
        assert_eq!(sync.epoch(), epoch);
    }
}
