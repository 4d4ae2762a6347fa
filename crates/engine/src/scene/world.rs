use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{
    AgentId, AgentState, GrabOutcome, ObjectId, SceneControl, SceneObjectRecord, SceneView,
};
use crate::episode::Episode;
use crate::input::AgentAction;
use crate::math::{Quat, Vec3, FORWARD, UP};

const DEFAULT_AGENT: AgentId = AgentId(0);
const MAX_LOOK_PITCH_DEGREES: f32 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldTuning {
    pub move_step_meters: f32,
    pub turn_step_degrees: f32,
    pub look_step_degrees: f32,
    /// Planar distance within which grab picks up an object.
    pub grab_reach_meters: f32,
    /// How far in front of the agent a released object is placed.
    pub drop_distance_meters: f32,
    /// Minimum planar gap to other objects at the drop point.
    pub drop_clearance_meters: f32,
}

impl Default for WorldTuning {
    fn default() -> Self {
        Self {
            move_step_meters: 0.25,
            turn_step_degrees: 10.0,
            look_step_degrees: 10.0,
            grab_reach_meters: 1.5,
            drop_distance_meters: 1.0,
            drop_clearance_meters: 0.1,
        }
    }
}

#[derive(Debug, Default)]
struct ObjectIdAllocator {
    next: u32,
}

impl ObjectIdAllocator {
    fn allocate(&mut self) -> ObjectId {
        let id = ObjectId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    fn reserve_through(&mut self, id: ObjectId) {
        self.next = self.next.max(id.0.saturating_add(1));
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WorldObject {
    id: ObjectId,
    handle: String,
    icon: Option<String>,
    translation: Vec3,
    rotation: Quat,
    bounding_box_height: f32,
}

impl WorldObject {
    fn record(&self) -> SceneObjectRecord {
        SceneObjectRecord {
            object_id: self.id,
            handle: self.handle.clone(),
            icon: self.icon.clone(),
            translation: self.translation,
            rotation: self.rotation,
        }
    }
}

#[derive(Debug, Clone)]
struct GrippedObject {
    object: WorldObject,
    /// Scene-order slot the object is returned to on release.
    slot: usize,
}

/// Headless scene: objects on a flat walkable floor and a single agent.
/// Released objects come back under a new id; the superseded id stays
/// resolvable through an alias table so callers holding episode ids keep
/// working.
#[derive(Debug)]
pub struct SceneWorld {
    tuning: WorldTuning,
    allocator: ObjectIdAllocator,
    objects: Vec<WorldObject>,
    aliases: BTreeMap<ObjectId, ObjectId>,
    added: Vec<ObjectId>,
    gripped: Option<GrippedObject>,
    agent: AgentState,
    look_pitch_degrees: f32,
    initial_objects: Vec<WorldObject>,
    initial_agent: AgentState,
    elapsed_seconds: f64,
    render_requests: u64,
}

impl Default for SceneWorld {
    fn default() -> Self {
        Self::new(WorldTuning::default(), AgentState::default())
    }
}

impl SceneWorld {
    pub fn new(tuning: WorldTuning, agent: AgentState) -> Self {
        Self {
            tuning,
            allocator: ObjectIdAllocator::default(),
            objects: Vec::new(),
            aliases: BTreeMap::new(),
            added: Vec::new(),
            gripped: None,
            agent,
            look_pitch_degrees: 0.0,
            initial_objects: Vec::new(),
            initial_agent: agent,
            elapsed_seconds: 0.0,
            render_requests: 0,
        }
    }

    pub fn from_episode(episode: &Episode, tuning: WorldTuning) -> Self {
        let agent = AgentState {
            position: episode.start_position,
            rotation: episode.start_rotation.normalized(),
        };
        let mut world = Self::new(tuning, agent);
        for object in &episode.objects {
            world.allocator.reserve_through(object.object_id);
            world.objects.push(WorldObject {
                id: object.object_id,
                handle: object
                    .object_handle
                    .clone()
                    .unwrap_or_else(|| format!("object_{}", object.object_id)),
                icon: object.object_icon.clone(),
                translation: object.position,
                rotation: object.rotation,
                bounding_box_height: object.bounding_box_height,
            });
        }
        world.initial_objects = world.objects.clone();
        debug!(objects = world.objects.len(), "scene_world_loaded");
        world
    }

    pub fn tuning(&self) -> WorldTuning {
        self.tuning
    }

    pub fn agent(&self) -> AgentState {
        self.agent
    }

    pub fn set_agent(&mut self, agent: AgentState) {
        self.agent = agent;
    }

    pub fn look_pitch_degrees(&self) -> f32 {
        self.look_pitch_degrees
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn render_requests(&self) -> u64 {
        self.render_requests
    }

    /// Live id for `object_id`, following release aliases.
    pub fn resolve_id(&self, object_id: ObjectId) -> ObjectId {
        self.aliases.get(&object_id).copied().unwrap_or(object_id)
    }

    fn find(&self, object_id: ObjectId) -> Option<&WorldObject> {
        let live = self.resolve_id(object_id);
        self.objects.iter().find(|object| object.id == live)
    }

    fn find_mut(&mut self, object_id: ObjectId) -> Option<&mut WorldObject> {
        let live = self.resolve_id(object_id);
        self.objects.iter_mut().find(|object| object.id == live)
    }

    fn facing(&self) -> Vec3 {
        let forward = self.agent.rotation.rotate(FORWARD);
        let planar = Vec3::new(forward.x, 0.0, forward.z);
        let length = planar.length();
        if length <= f32::EPSILON {
            return FORWARD;
        }
        planar * (1.0 / length)
    }

    fn drop_point(&self) -> Vec3 {
        self.agent.position + self.facing() * self.tuning.drop_distance_meters
    }

    fn nearest_in_reach(&self) -> Option<usize> {
        let reach = self.tuning.grab_reach_meters;
        self.objects
            .iter()
            .enumerate()
            .map(|(slot, object)| {
                (
                    slot,
                    (object.translation - self.agent.position).planar_length(),
                )
            })
            .filter(|(_, distance)| *distance <= reach)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(slot, _)| slot)
    }

    fn drop_point_blocker(&self, drop_point: Vec3) -> Option<ObjectId> {
        self.objects
            .iter()
            .find(|object| {
                (object.translation - drop_point).planar_length()
                    < self.tuning.drop_clearance_meters
            })
            .map(|object| object.id)
    }

    fn mint_alias(&mut self, previous: ObjectId, new_id: ObjectId) {
        for live in self.aliases.values_mut() {
            if *live == previous {
                *live = new_id;
            }
        }
        self.aliases.insert(previous, new_id);
    }

    fn turn(&mut self, degrees: f32) {
        let yaw = Quat::from_axis_angle(UP, degrees.to_radians());
        self.agent.rotation = yaw.mul(self.agent.rotation).normalized();
    }
}

impl SceneView for SceneWorld {
    fn objects_in_scene(&self) -> Vec<SceneObjectRecord> {
        self.objects.iter().map(WorldObject::record).collect()
    }

    fn object_translation(&self, object_id: ObjectId) -> Option<Vec3> {
        self.find(object_id).map(|object| object.translation)
    }

    fn object_bounding_box_height(&self, object_id: ObjectId) -> Option<f32> {
        self.find(object_id).map(|object| object.bounding_box_height)
    }

    fn geodesic_distance(&self, from: Vec3, to: Vec3) -> f32 {
        (to - from).planar_length()
    }

    fn selected_agent_id(&self) -> AgentId {
        DEFAULT_AGENT
    }

    fn agent_state(&self, agent_id: AgentId) -> Option<AgentState> {
        (agent_id == DEFAULT_AGENT).then_some(self.agent)
    }

    fn gripped_object_id(&self) -> Option<ObjectId> {
        self.gripped.as_ref().map(|gripped| gripped.object.id)
    }
}

impl SceneControl for SceneWorld {
    fn set_translation(&mut self, object_id: ObjectId, translation: Vec3) -> bool {
        match self.find_mut(object_id) {
            Some(object) => {
                object.translation = translation;
                true
            }
            None => false,
        }
    }

    fn set_rotation(&mut self, object_id: ObjectId, rotation: Quat) -> bool {
        match self.find_mut(object_id) {
            Some(object) => {
                object.rotation = rotation;
                true
            }
            None => false,
        }
    }

    fn reset(&mut self) {
        self.objects = self.initial_objects.clone();
        self.aliases.clear();
        self.added.clear();
        self.gripped = None;
        self.agent = self.initial_agent;
        self.look_pitch_degrees = 0.0;
        debug!(objects = self.objects.len(), "scene_world_reset");
    }

    fn step_agent(&mut self, action: AgentAction) {
        let tuning = self.tuning;
        match action {
            AgentAction::MoveForward => {
                self.agent.position = self.agent.position + self.facing() * tuning.move_step_meters;
            }
            AgentAction::MoveBackward => {
                self.agent.position = self.agent.position - self.facing() * tuning.move_step_meters;
            }
            AgentAction::TurnLeft => self.turn(tuning.turn_step_degrees),
            AgentAction::TurnRight => self.turn(-tuning.turn_step_degrees),
            AgentAction::LookUp => {
                self.look_pitch_degrees = (self.look_pitch_degrees + tuning.look_step_degrees)
                    .min(MAX_LOOK_PITCH_DEGREES);
            }
            AgentAction::LookDown => {
                self.look_pitch_degrees = (self.look_pitch_degrees - tuning.look_step_degrees)
                    .max(-MAX_LOOK_PITCH_DEGREES);
            }
            AgentAction::GrabReleaseObject
            | AgentAction::AddPrimitiveObject
            | AgentAction::AddTemplateObject
            | AgentAction::RemoveLastObject => {}
        }
    }

    fn grab_release(&mut self) -> GrabOutcome {
        if let Some(gripped) = self.gripped.take() {
            let drop_point = self.drop_point();
            if let Some(blocker) = self.drop_point_blocker(drop_point) {
                debug!(held = %gripped.object.id, blocker = %blocker, "release_blocked");
                let held = gripped.object.id;
                self.gripped = Some(gripped);
                return GrabOutcome::Collision(held);
            }

            let previous_id = gripped.object.id;
            let new_id = self.allocator.allocate();
            self.mint_alias(previous_id, new_id);
            if let Some(added) = self.added.iter_mut().find(|added| **added == previous_id) {
                *added = new_id;
            }
            let mut object = gripped.object;
            object.id = new_id;
            object.translation = Vec3::new(drop_point.x, self.agent.position.y, drop_point.z);
            let slot = gripped.slot.min(self.objects.len());
            self.objects.insert(slot, object);
            return GrabOutcome::Released {
                previous_id,
                new_id,
            };
        }

        match self.nearest_in_reach() {
            Some(slot) => {
                let object = self.objects.remove(slot);
                let id = object.id;
                self.gripped = Some(GrippedObject { object, slot });
                GrabOutcome::Grabbed(id)
            }
            None => GrabOutcome::NothingInReach,
        }
    }

    fn add_object(&mut self, handle: &str) -> ObjectId {
        let id = self.allocator.allocate();
        let drop_point = self.drop_point();
        self.objects.push(WorldObject {
            id,
            handle: handle.to_string(),
            icon: None,
            translation: Vec3::new(drop_point.x, self.agent.position.y, drop_point.z),
            rotation: Quat::IDENTITY,
            bounding_box_height: 0.0,
        });
        self.added.push(id);
        id
    }

    fn remove_last_object(&mut self) -> Option<ObjectId> {
        while let Some(id) = self.added.pop() {
            if let Some(slot) = self.objects.iter().position(|object| object.id == id) {
                self.objects.remove(slot);
                return Some(id);
            }
            if self.gripped_object_id() == Some(id) {
                warn!(object_id = %id, "remove_last_object_skipped_gripped");
                self.added.push(id);
                return None;
            }
        }
        None
    }

    fn step_world(&mut self, step_seconds: f32) {
        if step_seconds.is_finite() && step_seconds > 0.0 {
            self.elapsed_seconds += f64::from(step_seconds);
        }
    }

    fn request_render(&mut self) {
        self.render_requests = self.render_requests.saturating_add(1);
    }
}
