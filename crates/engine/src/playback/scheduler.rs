use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::metrics::PlaybackMetricsHandle;
use crate::record::EventLog;

static PENDING_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireTarget {
    /// Index into the event log.
    Event(usize),
    Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledFire {
    pub due: Duration,
    pub sequence: u64,
    pub target: FireTarget,
}

impl Ord for ScheduledFire {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; earliest (due, sequence) must pop first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ScheduledFire {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Playback speed multiplier; 2.0 replays twice as fast.
    pub speed: f64,
    /// Delay after the last event before completion fires.
    pub completion_grace: Duration,
    /// Longest uninterrupted sleep of the wall clock.
    pub sleep_slice: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            completion_grace: Duration::from_millis(1),
            sleep_slice: Duration::from_millis(10),
        }
    }
}

impl PlaybackConfig {
    pub fn with_speed(speed: f64) -> Self {
        Self {
            speed,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), PlaybackError> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(PlaybackError::InvalidSpeed { speed: self.speed });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("playback speed must be a positive finite number, got {speed}")]
    InvalidSpeed { speed: f64 },
}

type PendingSet = BinaryHeap<ScheduledFire>;

#[derive(Debug)]
struct ReplayShared {
    /// `None` once the replay has been cancelled or completed.
    pending: Mutex<Option<PendingSet>>,
    completion_signalled: AtomicBool,
    cancelled_externally: AtomicBool,
}

/// Cancels a replay from any thread. Cloning shares the same replay.
#[derive(Debug, Clone)]
pub struct ReplayHandle {
    shared: Arc<ReplayShared>,
    metrics: PlaybackMetricsHandle,
}

impl ReplayHandle {
    fn new(pending: PendingSet) -> Self {
        Self {
            shared: Arc::new(ReplayShared {
                pending: Mutex::new(Some(pending)),
                completion_signalled: AtomicBool::new(false),
                cancelled_externally: AtomicBool::new(false),
            }),
            metrics: PlaybackMetricsHandle::default(),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingSet>> {
        match self.shared.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                if PENDING_LOCK_POISON_WARNED
                    .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    warn!("replay pending set lock poisoned; recovered inner value");
                }
                poisoned.into_inner()
            }
        }
    }

    /// Drops every pending fire, the completion fire included. Returns
    /// `false` when the replay was already cancelled or finished.
    pub fn cancel(&self) -> bool {
        let taken = self.lock_pending().take();
        match taken {
            Some(pending) => {
                if !self.shared.completion_signalled.load(Ordering::Acquire) {
                    self.shared
                        .cancelled_externally
                        .store(true, Ordering::Release);
                }
                debug!(dropped = pending.len(), "replay_pending_cleared");
                true
            }
            None => false,
        }
    }

    /// True once the pending set has been released, by cancel or completion.
    pub fn is_finished(&self) -> bool {
        self.lock_pending().is_none()
    }

    /// True when the replay stopped before its completion fire.
    pub fn was_cancelled(&self) -> bool {
        self.shared.cancelled_externally.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.shared.completion_signalled.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().as_ref().map_or(0, BinaryHeap::len)
    }

    pub fn metrics(&self) -> &PlaybackMetricsHandle {
        &self.metrics
    }

    pub(crate) fn next_due(&self) -> Option<Duration> {
        self.lock_pending()
            .as_ref()
            .and_then(|pending| pending.peek().map(|fire| fire.due))
    }

    pub(crate) fn pop_next(&self) -> Option<ScheduledFire> {
        self.lock_pending().as_mut().and_then(BinaryHeap::pop)
    }

    /// Runs the completion sequence: release pending fires, then report
    /// whether this is the first completion signal.
    pub(crate) fn complete(&self) -> bool {
        let was_signalled = self
            .shared
            .completion_signalled
            .swap(true, Ordering::AcqRel);
        self.cancel();
        !was_signalled
    }
}

/// Time-ordered fires for one event log.
#[derive(Debug)]
pub struct ReplayScheduler<'log> {
    pub(crate) log: &'log EventLog,
    pub(crate) config: PlaybackConfig,
    pub(crate) handle: ReplayHandle,
    completion_due: Duration,
}

impl<'log> ReplayScheduler<'log> {
    pub fn new(log: &'log EventLog, config: PlaybackConfig) -> Result<Self, PlaybackError> {
        config.validate()?;

        let mut pending = BinaryHeap::with_capacity(log.len() + 1);
        let mut last_due = Duration::ZERO;
        for (sequence, (due, _)) in log.timeline(config.speed).enumerate() {
            pending.push(ScheduledFire {
                due,
                sequence: sequence as u64,
                target: FireTarget::Event(sequence),
            });
            last_due = due;
        }
        let completion_due = last_due.saturating_add(config.completion_grace);
        pending.push(ScheduledFire {
            due: completion_due,
            sequence: log.len() as u64,
            target: FireTarget::Completion,
        });

        Ok(Self {
            log,
            config,
            handle: ReplayHandle::new(pending),
            completion_due,
        })
    }

    pub fn handle(&self) -> ReplayHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn completion_due(&self) -> Duration {
        self.completion_due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(text: &str) -> EventLog {
        EventLog::parse(text).expect("parse")
    }

    const FOUR_EVENTS: &str = "\
TEST,viewerStart,1000,\"{\"\"step\"\":\"\"viewer\"\"}\"
TEST,handleAction,1005,\"{\"\"action\"\":\"\"turnLeft\"\"}\"
TEST,handleAction,1005,\"{\"\"action\"\":\"\"turnRight\"\"}\"
TEST,simReset,1010,{}
";

    #[test]
    fn fires_pop_in_due_then_file_order() {
        let log = log(FOUR_EVENTS);
        let scheduler = ReplayScheduler::new(&log, PlaybackConfig::default()).expect("scheduler");
        let handle = scheduler.handle();

        let mut popped = Vec::new();
        while let Some(fire) = handle.pop_next() {
            popped.push((fire.due.as_millis(), fire.target));
        }
        assert_eq!(
            popped,
            vec![
                (0, FireTarget::Event(0)),
                (5, FireTarget::Event(1)),
                (5, FireTarget::Event(2)),
                (10, FireTarget::Event(3)),
                (11, FireTarget::Completion),
            ]
        );
    }

    #[test]
    fn speed_scales_completion_due() {
        let log = log(FOUR_EVENTS);
        let scheduler =
            ReplayScheduler::new(&log, PlaybackConfig::with_speed(2.0)).expect("scheduler");
        assert_eq!(scheduler.completion_due(), Duration::from_millis(6));
    }

    #[test]
    fn empty_log_still_schedules_completion() {
        let log = EventLog::default();
        let scheduler = ReplayScheduler::new(&log, PlaybackConfig::default()).expect("scheduler");
        assert_eq!(scheduler.handle().pending_count(), 1);
        assert_eq!(scheduler.completion_due(), Duration::from_millis(1));
    }

    #[test]
    fn rejects_non_positive_speed() {
        let log = EventLog::default();
        for speed in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                ReplayScheduler::new(&log, PlaybackConfig::with_speed(speed)),
                Err(PlaybackError::InvalidSpeed { .. })
            ));
        }
    }

    #[test]
    fn cancel_is_idempotent() {
        let log = log(FOUR_EVENTS);
        let scheduler = ReplayScheduler::new(&log, PlaybackConfig::default()).expect("scheduler");
        let handle = scheduler.handle();

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_finished());
        assert!(handle.was_cancelled());
        assert_eq!(handle.pending_count(), 0);
        assert_eq!(handle.pop_next(), None);
    }

    #[test]
    fn completion_signals_once() {
        let log = log(FOUR_EVENTS);
        let scheduler = ReplayScheduler::new(&log, PlaybackConfig::default()).expect("scheduler");
        let handle = scheduler.handle();

        assert!(handle.complete());
        assert!(!handle.complete());
        assert!(!handle.cancel());
        assert!(handle.is_completed());
        assert!(!handle.was_cancelled());
    }
}
