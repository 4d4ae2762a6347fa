use std::thread;
use std::time::{Duration, Instant};

use super::scheduler::ReplayHandle;

/// Source of replay time. Waits return early when the replay is cancelled.
pub trait PlaybackClock {
    fn elapsed(&self) -> Duration;

    /// Blocks until `due` has elapsed since start. Returns `false` if the
    /// replay was released while waiting.
    fn wait_until(&mut self, due: Duration, handle: &ReplayHandle) -> bool;
}

#[derive(Debug)]
pub struct WallClock {
    started_at: Instant,
    sleep_slice: Duration,
}

impl WallClock {
    pub fn start(sleep_slice: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            sleep_slice: if sleep_slice.is_zero() {
                Duration::from_millis(1)
            } else {
                sleep_slice
            },
        }
    }
}

impl PlaybackClock for WallClock {
    fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn wait_until(&mut self, due: Duration, handle: &ReplayHandle) -> bool {
        loop {
            if handle.is_finished() {
                return false;
            }
            let now = self.elapsed();
            if now >= due {
                return true;
            }
            thread::sleep((due - now).min(self.sleep_slice));
        }
    }
}

/// Clock that jumps straight to each due time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackClock for ManualClock {
    fn elapsed(&self) -> Duration {
        self.now
    }

    fn wait_until(&mut self, due: Duration, handle: &ReplayHandle) -> bool {
        self.now = self.now.max(due);
        !handle.is_finished()
    }
}
