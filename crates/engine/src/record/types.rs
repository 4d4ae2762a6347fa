use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};
use crate::scene::ObjectId;

pub const EVENT_SIM_RESET: &str = "simReset";
pub const EVENT_HANDLE_ACTION: &str = "handleAction";
pub const EVENT_STEP_PHYSICS: &str = "stepPhysics";

/// Payload `step` value marking time zero of a replay.
pub const VIEWER_SENTINEL: &str = "viewer";

/// Pose of one object as captured by a physics step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectState {
    pub object_id: ObjectId,
    pub translation: Vec3,
    pub rotation: Quat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEventKind {
    Reset,
    ActionTaken {
        action_name: String,
    },
    PhysicsStep {
        step_size: f32,
        object_states: Vec<ObjectState>,
    },
    /// In-scope line with no scene effect (the sentinel line, bookkeeping
    /// events written by the recorder, ...). Still occupies a timeline slot.
    Marker {
        event_name: String,
    },
}

impl RecordedEventKind {
    pub fn label(&self) -> &str {
        match self {
            Self::Reset => EVENT_SIM_RESET,
            Self::ActionTaken { .. } => EVENT_HANDLE_ACTION,
            Self::PhysicsStep { .. } => EVENT_STEP_PHYSICS,
            Self::Marker { event_name } => event_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Milliseconds since the sentinel line.
    pub relative_timestamp_ms: f64,
    pub phase: String,
    pub line_number: usize,
    pub kind: RecordedEventKind,
}

impl RecordedEvent {
    /// Real-time offset from playback start at the given speed multiplier.
    pub fn delay(&self, speed: f64) -> Duration {
        let nanos = (self.relative_timestamp_ms / speed * 1_000_000.0).round();
        Duration::from_nanos(nanos.max(0.0) as u64)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionPayload {
    pub(crate) action: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PhysicsStepPayload {
    pub(crate) step: f32,
    pub(crate) object_states: Vec<ObjectState>,
}
