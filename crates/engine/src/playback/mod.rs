//! Timed replay of an [`EventLog`](crate::record::EventLog).
//!
//! Fires are kept in a priority queue ordered by `(due, file position)` and
//! driven on the calling thread. A [`ReplayHandle`] may cancel from anywhere.

mod clock;
mod metrics;
mod runner;
mod scheduler;

pub use clock::{ManualClock, PlaybackClock, WallClock};
pub use metrics::{PlaybackMetrics, PlaybackMetricsHandle};
pub use runner::{
    apply_physics_step, start_replay, PhysicsStepReport, ReplayHandlers, ReplayOutcome,
};
pub use scheduler::{
    FireTarget, PlaybackConfig, PlaybackError, ReplayHandle, ReplayScheduler, ScheduledFire,
};
