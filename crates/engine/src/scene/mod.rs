//! Seam between the replay/validation core and the simulator that owns the
//! scene. Validators only see [`SceneView`]; replay handlers and live input
//! go through [`SceneControl`].

mod world;

use serde::{Deserialize, Serialize};

use crate::input::AgentAction;
use crate::math::{Quat, Vec3};
use crate::record::ObjectState;

pub use world::{SceneWorld, WorldTuning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AgentId(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AgentState {
    pub position: Vec3,
    pub rotation: Quat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObjectRecord {
    pub object_id: ObjectId,
    pub handle: String,
    pub icon: Option<String>,
    pub translation: Vec3,
    pub rotation: Quat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabOutcome {
    Grabbed(ObjectId),
    /// The held object was placed back into the scene under a new id.
    Released {
        previous_id: ObjectId,
        new_id: ObjectId,
    },
    /// The drop point is occupied; the object is still held.
    Collision(ObjectId),
    NothingInReach,
}

pub trait SceneView {
    /// Live objects in scene order.
    fn objects_in_scene(&self) -> Vec<SceneObjectRecord>;

    fn object_translation(&self, object_id: ObjectId) -> Option<Vec3>;

    /// Height of the object's top surface above its origin.
    fn object_bounding_box_height(&self, object_id: ObjectId) -> Option<f32>;

    fn geodesic_distance(&self, from: Vec3, to: Vec3) -> f32;

    fn euclidean_distance(&self, from: Vec3, to: Vec3) -> f32 {
        from.distance(to)
    }

    fn selected_agent_id(&self) -> AgentId;

    fn agent_state(&self, agent_id: AgentId) -> Option<AgentState>;

    fn gripped_object_id(&self) -> Option<ObjectId>;

    fn object_states(&self) -> Vec<ObjectState> {
        self.objects_in_scene()
            .into_iter()
            .map(|record| ObjectState {
                object_id: record.object_id,
                translation: record.translation,
                rotation: record.rotation,
            })
            .collect()
    }
}

pub trait SceneControl: SceneView {
    /// Returns `false` when no live object has this id.
    fn set_translation(&mut self, object_id: ObjectId, translation: Vec3) -> bool;

    fn set_rotation(&mut self, object_id: ObjectId, rotation: Quat) -> bool;

    fn reset(&mut self);

    /// Moves or turns the selected agent. Non-locomotion actions are ignored.
    fn step_agent(&mut self, action: AgentAction);

    fn grab_release(&mut self) -> GrabOutcome;

    fn add_object(&mut self, handle: &str) -> ObjectId;

    fn remove_last_object(&mut self) -> Option<ObjectId>;

    fn step_world(&mut self, step_seconds: f32);

    fn request_render(&mut self) {}
}
