use std::path::Path;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::episode::Episode;
use crate::input::{action_for_key_code, AgentAction, InputGate, UnknownActionError};
use crate::inventory::{Inventory, InventoryItem};
use crate::math::polar_offset;
use crate::playback::{
    apply_physics_step, PhysicsStepReport, PlaybackClock, PlaybackError, PlaybackMetrics,
    ReplayHandlers, ReplayOutcome, ReplayScheduler,
};
use crate::record::{
    EventLog, ObjectState, RecordParseError, TrialRecorder, EVENT_HANDLE_ACTION, EVENT_SIM_RESET,
    EVENT_STEP_PHYSICS,
};
use crate::scene::{GrabOutcome, SceneControl, SceneObjectRecord};
use crate::validator::{TaskValidator, ValidationError};

pub const PRIMITIVE_OBJECT_HANDLE: &str =
    "cylinderSolid_rings_1_segments_12_halfLen_1_useTexCoords_false_useTangents_false_capEnds_true";
pub const TEMPLATE_OBJECT_HANDLES: [&str; 4] = [
    "/data/objects/sphere.phys_properties.json",
    "/data/objects/chair.phys_properties.json",
    "/data/objects/mini_soccer_ball.phys_properties.json",
    "/data/objects/colored_wood_blocks.phys_properties.json",
];

pub const EVENT_FLYTHROUGH_START: &str = "flythroughStart";
pub const EVENT_FLYTHROUGH_END: &str = "flythroughEnd";
pub const TASK_COMPLETED_STATUS: &str = "Task completed!";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    UnknownAction(#[from] UnknownActionError),
    #[error("task validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to start flythrough: {0}")]
    Playback(#[from] PlaybackError),
    #[error("failed to load replay: {0}")]
    LoadReplay(#[from] RecordParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Ready,
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub level: StatusLevel,
    pub text: String,
}

impl Status {
    pub fn ready() -> Self {
        Self::new(StatusLevel::Ready, "Ready")
    }

    pub fn new(level: StatusLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlythroughReport {
    pub outcome: ReplayOutcome,
    pub task_satisfied: bool,
    pub metrics: PlaybackMetrics,
}

/// Display name derived from an object handle: file stem up to the first dot.
pub fn object_display_name(handle: &str) -> &str {
    let file = handle.rsplit('/').next().unwrap_or(handle);
    file.split('.').next().unwrap_or(file)
}

/// A running task: one episode, its scene, the inventory, and the optional
/// trial recorder.
#[derive(Debug)]
pub struct TaskSession<S> {
    episode: Episode,
    scene: S,
    validator: TaskValidator,
    inventory: Inventory,
    input: InputGate,
    recorder: Option<TrialRecorder>,
    status: Status,
    next_template: usize,
    flythrough_active: bool,
    task_completed: bool,
}

impl<S: SceneControl> TaskSession<S> {
    pub fn new(episode: Episode, scene: S, inventory_slots: usize) -> Self {
        let validator = TaskValidator::new(&episode);
        Self {
            episode,
            scene,
            validator,
            inventory: Inventory::new(inventory_slots),
            input: InputGate::default(),
            recorder: None,
            status: Status::ready(),
            next_template: 0,
            flythrough_active: false,
            task_completed: false,
        }
    }

    /// Starts recording trial events; the first line is the replay sentinel.
    pub fn with_recorder(mut self, mut recorder: TrialRecorder) -> Self {
        recorder.mark_viewer_start();
        self.recorder = Some(recorder);
        self
    }

    pub fn episode(&self) -> &Episode {
        &self.episode
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn input_gate(&self) -> &InputGate {
        &self.input
    }

    pub fn recorder(&self) -> Option<&TrialRecorder> {
        self.recorder.as_ref()
    }

    pub fn take_recorder(&mut self) -> Option<TrialRecorder> {
        self.recorder.take()
    }

    pub fn is_task_completed(&self) -> bool {
        self.task_completed
    }

    pub fn validate(&self) -> Result<bool, ValidationError> {
        self.validator.validate(&self.scene)
    }

    fn set_status(&mut self, level: StatusLevel, text: impl Into<String>) {
        self.status = Status::new(level, text);
        debug!(level = ?self.status.level, text = %self.status.text, "status_changed");
    }

    fn record(&mut self, event: &str, data: serde_json::Value) {
        if self.flythrough_active {
            return;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(event, data);
        }
    }

    /// Live key press. Ignored while input is suspended or unbound.
    pub fn handle_key(&mut self, key_code: u32) -> Result<Option<AgentAction>, SessionError> {
        if !self.input.is_enabled() {
            debug!(key_code, "key_ignored_input_suspended");
            return Ok(None);
        }
        let Some(action) = action_for_key_code(key_code) else {
            return Ok(None);
        };
        self.handle_action(action)?;
        Ok(Some(action))
    }

    pub fn handle_action_name(&mut self, name: &str) -> Result<AgentAction, SessionError> {
        let action = name.parse::<AgentAction>()?;
        self.handle_action(action)?;
        Ok(action)
    }

    pub fn handle_action(&mut self, action: AgentAction) -> Result<(), SessionError> {
        self.record(EVENT_HANDLE_ACTION, json!({ "action": action.name() }));
        self.apply_action(action)?;
        Ok(())
    }

    fn apply_action(&mut self, action: AgentAction) -> Result<(), ValidationError> {
        match action {
            AgentAction::AddPrimitiveObject => {
                let id = self.scene.add_object(PRIMITIVE_OBJECT_HANDLE);
                debug!(object_id = %id, "primitive_object_added");
            }
            AgentAction::AddTemplateObject => {
                let handle =
                    TEMPLATE_OBJECT_HANDLES[self.next_template % TEMPLATE_OBJECT_HANDLES.len()];
                self.next_template = self.next_template.wrapping_add(1);
                let id = self.scene.add_object(handle);
                debug!(object_id = %id, handle, "template_object_added");
            }
            AgentAction::RemoveLastObject => {
                let removed = self.scene.remove_last_object();
                debug!(removed = ?removed, "last_object_removed");
            }
            AgentAction::GrabReleaseObject => {
                let before = self.scene.objects_in_scene();
                let outcome = self.scene.grab_release();
                self.update_inventory(outcome, &before);
                if self.scene.gripped_object_id().is_none()
                    && self.validator.validate(&self.scene)?
                {
                    self.task_completed = true;
                    self.set_status(StatusLevel::Success, TASK_COMPLETED_STATUS);
                    info!(episode = ?self.episode.episode_id, "task_completed");
                }
            }
            locomotion => {
                self.scene.step_agent(locomotion);
                self.set_status(StatusLevel::Info, locomotion.name());
            }
        }
        self.scene.request_render();
        Ok(())
    }

    fn update_inventory(&mut self, outcome: GrabOutcome, before: &[SceneObjectRecord]) {
        match outcome {
            GrabOutcome::Collision(_) => {
                self.set_status(StatusLevel::Warning, "Collision while releasing object!");
            }
            GrabOutcome::NothingInReach => {
                self.set_status(StatusLevel::Info, "Nothing within reach");
            }
            GrabOutcome::Released {
                previous_id,
                new_id,
            } => {
                if let Some(slot) = self.inventory.find_object_slot(previous_id) {
                    self.inventory.set_slot(slot, None);
                }
                let name = self
                    .scene
                    .objects_in_scene()
                    .into_iter()
                    .find(|record| record.object_id == new_id)
                    .map(|record| object_display_name(&record.handle).to_string())
                    .unwrap_or_else(|| format!("object {new_id}"));
                self.set_status(StatusLevel::Info, format!("{name} released"));
            }
            GrabOutcome::Grabbed(object_id) => {
                let record = before.iter().find(|record| record.object_id == object_id);
                let name = record
                    .map(|record| object_display_name(&record.handle).to_string())
                    .unwrap_or_else(|| format!("object {object_id}"));
                match self.inventory.empty_slot() {
                    Some(slot) => {
                        self.inventory.set_slot(
                            slot,
                            Some(InventoryItem {
                                object_id,
                                name: name.clone(),
                                icon: record.and_then(|record| record.icon.clone()),
                            }),
                        );
                        self.set_status(StatusLevel::Info, format!("{name} picked up"));
                    }
                    None => warn!(object_id = %object_id, "inventory_full"),
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.scene.reset();
        self.inventory.reset();
        self.task_completed = false;
        self.set_status(StatusLevel::Ready, "Ready");
        self.record(EVENT_SIM_RESET, json!({}));
        self.scene.request_render();
    }

    /// Advances live physics and records the resulting poses. Does nothing
    /// while a flythrough drives the scene.
    pub fn step_physics(&mut self, step_seconds: f32) {
        if self.flythrough_active {
            return;
        }
        self.scene.step_world(step_seconds);
        let object_states = self.scene.object_states();
        self.record(
            EVENT_STEP_PHYSICS,
            json!({ "step": step_seconds, "objectStates": object_states }),
        );
        self.scene.request_render();
    }

    /// Loads a replay record, surfacing a failure as an error status.
    pub fn load_replay(&mut self, path: &Path) -> Result<EventLog, SessionError> {
        match EventLog::from_path(path) {
            Ok(log) => Ok(log),
            Err(error) => {
                self.set_status(StatusLevel::Error, format!("Failed to load replay: {error}"));
                Err(error.into())
            }
        }
    }

    /// Replays `scheduler` against this session with live input suspended,
    /// then validates the task.
    pub fn run_flythrough<C>(
        &mut self,
        scheduler: ReplayScheduler<'_>,
        clock: &mut C,
    ) -> Result<FlythroughReport, SessionError>
    where
        C: PlaybackClock + ?Sized,
    {
        self.set_status(StatusLevel::Info, "Initializing...");
        self.record(EVENT_FLYTHROUGH_START, json!({}));
        let handle = scheduler.handle();

        let outcome = {
            let _suspension = self.input.suspend();
            self.flythrough_active = true;
            let outcome = scheduler.run(&mut FlythroughHandlers { session: self }, clock);
            self.flythrough_active = false;
            outcome
        };

        self.record(EVENT_FLYTHROUGH_END, json!({}));
        let task_satisfied = self.validate()?;
        if outcome == ReplayOutcome::Cancelled {
            self.set_status(StatusLevel::Warning, "Flythrough cancelled");
        } else if task_satisfied {
            self.task_completed = true;
            self.set_status(StatusLevel::Success, TASK_COMPLETED_STATUS);
        } else {
            self.set_status(StatusLevel::Ready, "");
        }
        Ok(FlythroughReport {
            outcome,
            task_satisfied,
            metrics: handle.metrics().snapshot(),
        })
    }

    /// Distance and clockwise bearing from the agent to the episode goal.
    pub fn goal_direction(&self) -> Option<(f32, f32)> {
        let goal = self.episode.goal?;
        let agent = self.scene.agent_state(self.scene.selected_agent_id())?;
        Some(polar_offset(agent.position, agent.rotation, goal.position))
    }
}

struct FlythroughHandlers<'a, S> {
    session: &'a mut TaskSession<S>,
}

impl<S: SceneControl> ReplayHandlers for FlythroughHandlers<'_, S> {
    fn on_reset(&mut self) {
        self.session.reset();
    }

    fn on_action_taken(&mut self, action_name: &str) {
        let action = match action_name.parse::<AgentAction>() {
            Ok(action) => action,
            Err(error) => {
                warn!(%error, "replay_action_ignored");
                return;
            }
        };
        if let Err(error) = self.session.apply_action(action) {
            warn!(%error, action = action_name, "replay_validation_failed");
        }
    }

    fn on_physics_step(
        &mut self,
        _step_size: f32,
        object_states: &[ObjectState],
    ) -> PhysicsStepReport {
        apply_physics_step(&mut self.session.scene, object_states)
    }

    fn on_complete(&mut self) {
        debug!("flythrough_completion_fired");
    }
}
