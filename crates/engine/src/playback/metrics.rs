use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::warn;

static PLAYBACK_METRICS_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_metrics_lock_poison_once(operation: &'static str) {
    if PLAYBACK_METRICS_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "playback metrics lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackMetrics {
    pub events_fired: u64,
    pub physics_entries_applied: u64,
    pub physics_entries_skipped: u64,
    /// Worst observed delay between a fire's due time and its dispatch.
    pub max_lag: Duration,
}

/// Shared view of a running replay's counters, readable from any thread.
#[derive(Clone, Debug)]
pub struct PlaybackMetricsHandle {
    snapshot: Arc<RwLock<PlaybackMetrics>>,
}

impl Default for PlaybackMetricsHandle {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(PlaybackMetrics::default())),
        }
    }
}

impl PlaybackMetricsHandle {
    pub fn snapshot(&self) -> PlaybackMetrics {
        match self.snapshot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("read");
                *poisoned.into_inner()
            }
        }
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut PlaybackMetrics)) {
        match self.snapshot.write() {
            Ok(mut guard) => apply(&mut guard),
            Err(poisoned) => {
                warn_metrics_lock_poison_once("write");
                let mut guard = poisoned.into_inner();
                apply(&mut guard);
            }
        }
    }

    pub(crate) fn record_event(&self, lag: Duration) {
        self.update(|metrics| {
            metrics.events_fired = metrics.events_fired.saturating_add(1);
            metrics.max_lag = metrics.max_lag.max(lag);
        });
    }

    pub(crate) fn record_physics(&self, applied: usize, skipped: usize) {
        self.update(|metrics| {
            metrics.physics_entries_applied =
                metrics.physics_entries_applied.saturating_add(applied as u64);
            metrics.physics_entries_skipped =
                metrics.physics_entries_skipped.saturating_add(skipped as u64);
        });
    }
}
