use tracing::{info, warn};

use super::clock::PlaybackClock;
use super::scheduler::{FireTarget, PlaybackConfig, PlaybackError, ReplayScheduler};
use crate::record::{EventLog, ObjectState, RecordedEventKind};
use crate::scene::SceneControl;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicsStepReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Scene-side reactions to replayed events. Handlers run to completion on
/// the driving thread; nothing else fires while one is running.
pub trait ReplayHandlers {
    fn on_reset(&mut self);

    fn on_action_taken(&mut self, action_name: &str);

    fn on_physics_step(&mut self, step_size: f32, object_states: &[ObjectState])
        -> PhysicsStepReport;

    fn on_marker(&mut self, _event_name: &str) {}

    fn on_complete(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed,
    Cancelled,
}

/// Applies each recorded pose in order. Ids the scene does not know are
/// skipped; the rest still apply. Requests one render afterwards.
pub fn apply_physics_step<S>(scene: &mut S, object_states: &[ObjectState]) -> PhysicsStepReport
where
    S: SceneControl + ?Sized,
{
    let mut report = PhysicsStepReport::default();
    for state in object_states {
        if scene.set_translation(state.object_id, state.translation)
            && scene.set_rotation(state.object_id, state.rotation)
        {
            report.applied += 1;
        } else {
            warn!(object_id = %state.object_id, "physics_step_unknown_object");
            report.skipped += 1;
        }
    }
    scene.request_render();
    report
}

/// Builds a scheduler for `log`. The returned scheduler's handle may be
/// cloned and cancelled before or during [`ReplayScheduler::run`].
pub fn start_replay(
    log: &EventLog,
    config: PlaybackConfig,
) -> Result<ReplayScheduler<'_>, PlaybackError> {
    ReplayScheduler::new(log, config)
}

impl ReplayScheduler<'_> {
    /// Drives every fire to completion or until cancelled.
    pub fn run<H, C>(self, handlers: &mut H, clock: &mut C) -> ReplayOutcome
    where
        H: ReplayHandlers + ?Sized,
        C: PlaybackClock + ?Sized,
    {
        let handle = self.handle.clone();
        let metrics = handle.metrics().clone();
        info!(
            events = self.log.len(),
            speed = self.config.speed,
            completion_ms = self.completion_due().as_millis() as u64,
            "replay_started"
        );

        while let Some(due) = handle.next_due() {
            if !clock.wait_until(due, &handle) {
                break;
            }
            let Some(fire) = handle.pop_next() else {
                break;
            };
            let lag = clock.elapsed().saturating_sub(fire.due);

            match fire.target {
                FireTarget::Event(index) => {
                    let Some(event) = self.log.events().get(index) else {
                        continue;
                    };
                    metrics.record_event(lag);
                    match &event.kind {
                        RecordedEventKind::Reset => handlers.on_reset(),
                        RecordedEventKind::ActionTaken { action_name } => {
                            handlers.on_action_taken(action_name)
                        }
                        RecordedEventKind::PhysicsStep {
                            step_size,
                            object_states,
                        } => {
                            let report = handlers.on_physics_step(*step_size, object_states);
                            metrics.record_physics(report.applied, report.skipped);
                        }
                        RecordedEventKind::Marker { event_name } => handlers.on_marker(event_name),
                    }
                }
                FireTarget::Completion => {
                    if handle.complete() {
                        handlers.on_complete();
                    }
                }
            }
        }

        let snapshot = metrics.snapshot();
        if handle.is_completed() {
            info!(
                fired = snapshot.events_fired,
                skipped_entries = snapshot.physics_entries_skipped,
                max_lag_ms = snapshot.max_lag.as_millis() as u64,
                "replay_completed"
            );
            ReplayOutcome::Completed
        } else {
            info!(fired = snapshot.events_fired, "replay_cancelled");
            ReplayOutcome::Cancelled
        }
    }
}
