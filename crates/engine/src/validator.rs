use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::episode::{Episode, ObjectGoal, TaskDescriptor, TaskType};
use crate::math::Vec3;
use crate::scene::{AgentId, ObjectId, SceneView};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("goal map refers to object index {index} but the scene holds {count} object(s)")]
    UnknownObjectIndex { index: usize, count: usize },
    #[error("object {object_id} is not in the scene")]
    UnknownObjectId { object_id: ObjectId },
    #[error("agent {agent:?} has no state")]
    UnknownAgent { agent: AgentId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Geodesic,
    Euclidean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavTarget {
    /// Any acceptance viewpoint of any goal.
    Viewpoints,
    /// The goal object's center.
    GoalCenter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrangementRules {
    pub receptacle_distance: f32,
    pub require_on_top: bool,
    /// Some episode object must be displaced by more than this.
    pub started_threshold: f32,
}

impl Default for ArrangementRules {
    fn default() -> Self {
        Self {
            receptacle_distance: 0.7,
            require_on_top: true,
            started_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleaningRules {
    pub moved_threshold: f32,
    pub lifted_threshold: f32,
    pub min_objects_moved: usize,
    pub min_objects_lifted: usize,
    pub started_threshold: f32,
}

impl Default for CleaningRules {
    fn default() -> Self {
        Self {
            moved_threshold: 0.2,
            lifted_threshold: 0.2,
            min_objects_moved: 4,
            min_objects_lifted: 4,
            started_threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectNavRules {
    /// Success requires a distance strictly below this.
    pub success_distance: f32,
    pub metric: DistanceMetric,
    pub target: NavTarget,
}

impl ObjectNavRules {
    pub const VIEWPOINTS: ObjectNavRules = ObjectNavRules {
        success_distance: 0.1,
        metric: DistanceMetric::Geodesic,
        target: NavTarget::Viewpoints,
    };

    pub const THDA: ObjectNavRules = ObjectNavRules {
        success_distance: 1.0,
        metric: DistanceMetric::Euclidean,
        target: NavTarget::GoalCenter,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskRules {
    Arrangement(ArrangementRules),
    Cleaning(CleaningRules),
    ObjectNav(ObjectNavRules),
}

impl TaskRules {
    /// Rules for a task descriptor, with the descriptor's overrides applied.
    pub fn from_descriptor(task: &TaskDescriptor, is_thda: bool) -> Self {
        match task.task_type {
            TaskType::Arrangement => {
                let defaults = ArrangementRules::default();
                TaskRules::Arrangement(ArrangementRules {
                    receptacle_distance: task
                        .distance_threshold
                        .unwrap_or(defaults.receptacle_distance),
                    require_on_top: task.require_on_top.unwrap_or(defaults.require_on_top),
                    started_threshold: task
                        .started_threshold
                        .unwrap_or(defaults.started_threshold),
                })
            }
            TaskType::Cleaning => {
                let defaults = CleaningRules::default();
                TaskRules::Cleaning(CleaningRules {
                    moved_threshold: task.moved_threshold.unwrap_or(defaults.moved_threshold),
                    lifted_threshold: task.lifted_threshold.unwrap_or(defaults.lifted_threshold),
                    min_objects_moved: task
                        .min_objects_moved
                        .unwrap_or(defaults.min_objects_moved),
                    min_objects_lifted: task
                        .min_objects_lifted
                        .unwrap_or(defaults.min_objects_lifted),
                    started_threshold: task
                        .started_threshold
                        .unwrap_or(defaults.started_threshold),
                })
            }
            TaskType::ObjectNav | TaskType::ObjectNavThda => {
                let base = if is_thda || task.task_type == TaskType::ObjectNavThda {
                    ObjectNavRules::THDA
                } else {
                    ObjectNavRules::VIEWPOINTS
                };
                TaskRules::ObjectNav(ObjectNavRules {
                    success_distance: task.success_distance.unwrap_or(base.success_distance),
                    ..base
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct InitialPlacement {
    object_id: ObjectId,
    position: Vec3,
}

/// Decides whether the current scene satisfies an episode's task. Reads the
/// scene only through [`SceneView`].
#[derive(Debug, Clone)]
pub struct TaskValidator {
    rules: Option<TaskRules>,
    has_goals: bool,
    receptacle_map: BTreeMap<usize, Vec<usize>>,
    nav_goals: Option<Vec<ObjectGoal>>,
    initial: Vec<InitialPlacement>,
}

impl TaskValidator {
    pub fn new(episode: &Episode) -> Self {
        let task = episode.task.as_ref();
        let rules = task.map(|task| TaskRules::from_descriptor(task, episode.is_thda));
        let goals = task.and_then(|task| task.goals.as_ref());
        let receptacle_map = goals
            .and_then(|goals| goals.object_to_receptacle_map.clone())
            .unwrap_or_default();
        let has_goals = match rules {
            Some(TaskRules::Arrangement(_)) => goals
                .map(|goals| goals.object_to_receptacle_map.is_some())
                .unwrap_or(false),
            _ => goals.is_some(),
        };
        Self {
            rules,
            has_goals,
            receptacle_map,
            nav_goals: episode.goals.clone(),
            initial: episode
                .objects
                .iter()
                .map(|object| InitialPlacement {
                    object_id: object.object_id,
                    position: object.position,
                })
                .collect(),
        }
    }

    pub fn with_rules(mut self, rules: TaskRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn rules(&self) -> Option<TaskRules> {
        self.rules
    }

    pub fn validate(&self, scene: &dyn SceneView) -> Result<bool, ValidationError> {
        match self.rules {
            None => Ok(true),
            Some(TaskRules::Arrangement(rules)) => self.validate_arrangement(rules, scene),
            Some(TaskRules::Cleaning(rules)) => self.validate_cleaning(rules, scene),
            Some(TaskRules::ObjectNav(rules)) => self.validate_object_nav(rules, scene),
        }
    }

    fn current_position(
        scene: &dyn SceneView,
        object_id: ObjectId,
    ) -> Result<Vec3, ValidationError> {
        scene
            .object_translation(object_id)
            .ok_or(ValidationError::UnknownObjectId { object_id })
    }

    fn validate_arrangement(
        &self,
        rules: ArrangementRules,
        scene: &dyn SceneView,
    ) -> Result<bool, ValidationError> {
        if !self.has_goals {
            return Ok(true);
        }
        if scene.gripped_object_id().is_some() {
            return Ok(false);
        }

        let mut started = false;
        for placement in &self.initial {
            let current = Self::current_position(scene, placement.object_id)?;
            if scene.geodesic_distance(placement.position, current) > rules.started_threshold {
                started = true;
            }
        }

        let objects = scene.objects_in_scene();
        let object_at = |index: usize| {
            objects
                .get(index)
                .map(|record| record.object_id)
                .ok_or(ValidationError::UnknownObjectIndex {
                    index,
                    count: objects.len(),
                })
        };

        let mut placed = 0usize;
        for (source_index, receptacles) in &self.receptacle_map {
            let source_id = object_at(*source_index)?;
            let source = Self::current_position(scene, source_id)?;
            let mut satisfied = false;
            for receptacle_index in receptacles {
                let receptacle_id = object_at(*receptacle_index)?;
                let receptacle = Self::current_position(scene, receptacle_id)?;
                let close_enough =
                    scene.geodesic_distance(source, receptacle) <= rules.receptacle_distance;
                let on_top = if rules.require_on_top {
                    let top = receptacle.y
                        + scene
                            .object_bounding_box_height(receptacle_id)
                            .ok_or(ValidationError::UnknownObjectId {
                                object_id: receptacle_id,
                            })?;
                    source.y > top
                } else {
                    true
                };
                if close_enough && on_top {
                    satisfied = true;
                }
            }
            if satisfied {
                placed += 1;
            }
        }

        let complete = placed == self.receptacle_map.len();
        debug!(
            pairs = self.receptacle_map.len(),
            placed, started, "arrangement_validated"
        );
        Ok(complete && started)
    }

    fn validate_cleaning(
        &self,
        rules: CleaningRules,
        scene: &dyn SceneView,
    ) -> Result<bool, ValidationError> {
        if !self.has_goals {
            return Ok(true);
        }
        if scene.gripped_object_id().is_some() {
            return Ok(false);
        }

        let mut started = false;
        let mut moved = 0usize;
        let mut lifted = 0usize;
        for placement in &self.initial {
            let current = Self::current_position(scene, placement.object_id)?;
            let displacement = scene.geodesic_distance(placement.position, current);
            if displacement > rules.started_threshold {
                started = true;
            }
            if displacement > rules.moved_threshold {
                moved += 1;
            }
            if (placement.position.y - current.y).abs() > rules.lifted_threshold {
                lifted += 1;
            }
        }

        debug!(moved, lifted, started, "cleaning_validated");
        Ok((moved >= rules.min_objects_moved || lifted >= rules.min_objects_lifted) && started)
    }

    fn validate_object_nav(
        &self,
        rules: ObjectNavRules,
        scene: &dyn SceneView,
    ) -> Result<bool, ValidationError> {
        let Some(goals) = self.nav_goals.as_ref() else {
            return Ok(true);
        };
        let agent = scene.selected_agent_id();
        let agent_position = scene
            .agent_state(agent)
            .ok_or(ValidationError::UnknownAgent { agent })?
            .position;

        let distance_to = |target: Vec3| match rules.metric {
            DistanceMetric::Geodesic => scene.geodesic_distance(agent_position, target),
            DistanceMetric::Euclidean => scene.euclidean_distance(agent_position, target),
        };
        let closest = goals
            .iter()
            .flat_map(|goal| -> Vec<Vec3> {
                match rules.target {
                    NavTarget::Viewpoints => goal
                        .view_points
                        .iter()
                        .map(|view_point| view_point.agent_state.position)
                        .collect(),
                    NavTarget::GoalCenter => vec![goal.position],
                }
            })
            .map(distance_to)
            .min_by(f32::total_cmp);

        debug!(goals = goals.len(), closest = ?closest, "object_nav_validated");
        Ok(closest.is_some_and(|distance| distance < rules.success_distance))
    }
}

/// One-shot validation of `episode` against the current scene.
pub fn validate(episode: &Episode, scene: &dyn SceneView) -> Result<bool, ValidationError> {
    TaskValidator::new(episode).validate(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{
        EpisodeObjectState, TaskGoals, ViewPoint, ViewPointAgentState,
    };
    use crate::math::Quat;
    use crate::scene::{AgentState, SceneControl, SceneWorld, WorldTuning};

    fn object(id: u32, position: Vec3, bounding_box_height: f32) -> EpisodeObjectState {
        EpisodeObjectState {
            object_id: ObjectId(id),
            position,
            rotation: Quat::IDENTITY,
            object_handle: None,
            object_icon: None,
            bounding_box_height,
        }
    }

    fn descriptor(task_type: TaskType, map: Option<BTreeMap<usize, Vec<usize>>>) -> TaskDescriptor {
        TaskDescriptor {
            task_type,
            goals: Some(TaskGoals {
                object_to_receptacle_map: map,
            }),
            distance_threshold: None,
            require_on_top: None,
            started_threshold: None,
            moved_threshold: None,
            lifted_threshold: None,
            min_objects_moved: None,
            min_objects_lifted: None,
            success_distance: None,
        }
    }

    fn episode(objects: Vec<EpisodeObjectState>, task: Option<TaskDescriptor>) -> Episode {
        let mut episode = Episode::fallback();
        episode.start_position = Vec3::ZERO;
        episode.start_rotation = Quat::IDENTITY;
        episode.objects = objects;
        episode.task = task;
        episode
    }

    fn world(episode: &Episode) -> SceneWorld {
        SceneWorld::from_episode(episode, WorldTuning::default())
    }

    fn arrangement_episode() -> Episode {
        let map = BTreeMap::from([(0, vec![1])]);
        episode(
            vec![
                object(0, Vec3::new(3.0, 0.5, 0.0), 0.1),
                object(1, Vec3::new(0.0, 0.0, 0.0), 0.3),
            ],
            Some(descriptor(TaskType::Arrangement, Some(map))),
        )
    }

    #[test]
    fn no_task_is_always_satisfied() {
        let episode = episode(Vec::new(), None);
        assert_eq!(validate(&episode, &world(&episode)), Ok(true));
    }

    #[test]
    fn arrangement_pair_satisfied_but_unstarted_fails() {
        // Source starts 0.5 from the receptacle and above its 0.2 top.
        let map = BTreeMap::from([(0, vec![1])]);
        let episode = episode(
            vec![
                object(0, Vec3::new(0.5, 0.5, 0.0), 0.1),
                object(1, Vec3::new(0.0, 0.0, 0.0), 0.2),
            ],
            Some(descriptor(TaskType::Arrangement, Some(map))),
        );
        let mut scene = world(&episode);
        assert_eq!(validate(&episode, &scene), Ok(false));

        scene.set_translation(ObjectId(0), Vec3::new(0.5, 0.5, 0.01));
        assert_eq!(validate(&episode, &scene), Ok(true));
    }

    #[test]
    fn arrangement_needs_only_one_listed_receptacle() {
        let map = BTreeMap::from([(0, vec![1, 2])]);
        let episode = episode(
            vec![
                object(0, Vec3::new(3.0, 0.5, 0.0), 0.1),
                object(1, Vec3::new(5.0, 0.0, 0.0), 0.3),
                object(2, Vec3::new(0.0, 0.0, 0.0), 0.3),
            ],
            Some(descriptor(TaskType::Arrangement, Some(map))),
        );
        let mut scene = world(&episode);
        scene.set_translation(ObjectId(0), Vec3::new(0.5, 0.5, 0.0));
        assert_eq!(validate(&episode, &scene), Ok(true));
    }

    #[test]
    fn arrangement_fails_when_any_source_is_misplaced() {
        let map = BTreeMap::from([(0, vec![2]), (1, vec![2])]);
        let episode = episode(
            vec![
                object(0, Vec3::new(3.0, 0.5, 0.0), 0.1),
                object(1, Vec3::new(-3.0, 0.5, 0.0), 0.1),
                object(2, Vec3::new(0.0, 0.0, 0.0), 0.3),
            ],
            Some(descriptor(TaskType::Arrangement, Some(map))),
        );
        let mut scene = world(&episode);
        scene.set_translation(ObjectId(0), Vec3::new(0.5, 0.5, 0.0));
        assert_eq!(validate(&episode, &scene), Ok(false));

        scene.set_translation(ObjectId(1), Vec3::new(0.0, 0.5, 0.5));
        assert_eq!(validate(&episode, &scene), Ok(true));
    }

    #[test]
    fn arrangement_succeeds_once_source_is_on_receptacle() {
        let episode = arrangement_episode();
        let mut scene = world(&episode);
        assert_eq!(validate(&episode, &scene), Ok(false));

        scene.set_translation(ObjectId(0), Vec3::new(0.5, 0.5, 0.0));
        assert_eq!(validate(&episode, &scene), Ok(true));
    }

    #[test]
    fn arrangement_requires_source_above_receptacle_top() {
        let episode = arrangement_episode();
        let mut scene = world(&episode);
        scene.set_translation(ObjectId(0), Vec3::new(0.5, 0.2, 0.0));
        assert_eq!(validate(&episode, &scene), Ok(false));

        let relaxed = TaskValidator::new(&episode).with_rules(TaskRules::Arrangement(
            ArrangementRules {
                require_on_top: false,
                ..ArrangementRules::default()
            },
        ));
        assert_eq!(relaxed.validate(&scene), Ok(true));
    }

    #[test]
    fn arrangement_fails_while_holding_an_object() {
        let episode = arrangement_episode();
        let mut scene = world(&episode);
        scene.set_translation(ObjectId(0), Vec3::new(0.5, 0.5, 0.0));
        assert!(matches!(scene.grab_release(), crate::scene::GrabOutcome::Grabbed(_)));
        assert_eq!(validate(&episode, &scene), Ok(false));
    }

    #[test]
    fn arrangement_without_goal_map_is_satisfied() {
        let episode = episode(
            vec![object(0, Vec3::ZERO, 0.0)],
            Some(descriptor(TaskType::Arrangement, None)),
        );
        assert_eq!(validate(&episode, &world(&episode)), Ok(true));
    }

    #[test]
    fn arrangement_with_bad_index_is_an_error() {
        let map = BTreeMap::from([(0, vec![7])]);
        let episode = episode(
            vec![object(0, Vec3::ZERO, 0.0)],
            Some(descriptor(TaskType::Arrangement, Some(map))),
        );
        assert_eq!(
            validate(&episode, &world(&episode)),
            Err(ValidationError::UnknownObjectIndex { index: 7, count: 1 })
        );
    }

    fn cleaning_episode() -> Episode {
        episode(
            (0..4)
                .map(|id| object(id, Vec3::new(id as f32 * 2.0, 0.0, 4.0), 0.0))
                .collect(),
            Some(descriptor(TaskType::Cleaning, None)),
        )
    }

    #[test]
    fn cleaning_succeeds_when_four_objects_moved() {
        let episode = cleaning_episode();
        let mut scene = world(&episode);
        for id in 0..4 {
            let start = episode.objects[id as usize].position;
            scene.set_translation(ObjectId(id), start + Vec3::new(0.21, 0.0, 0.0));
        }
        assert_eq!(validate(&episode, &scene), Ok(true));
    }

    #[test]
    fn cleaning_fails_with_three_moved_and_one_lifted() {
        let episode = cleaning_episode();
        let mut scene = world(&episode);
        for id in 0..3 {
            let start = episode.objects[id as usize].position;
            scene.set_translation(ObjectId(id), start + Vec3::new(0.21, 0.0, 0.0));
        }
        let start = episode.objects[3].position;
        scene.set_translation(ObjectId(3), start + Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(validate(&episode, &scene), Ok(false));
    }

    #[test]
    fn cleaning_lifted_alone_does_not_start_the_task() {
        let episode = cleaning_episode();
        let mut scene = world(&episode);
        for id in 0..4 {
            let start = episode.objects[id as usize].position;
            scene.set_translation(ObjectId(id), start + Vec3::new(0.0, 0.5, 0.0));
        }
        assert_eq!(validate(&episode, &scene), Ok(false));
    }

    #[test]
    fn cleaning_succeeds_when_four_objects_lifted_and_one_moved() {
        let episode = cleaning_episode();
        let mut scene = world(&episode);
        for id in 0..4 {
            let start = episode.objects[id as usize].position;
            let shift = if id == 0 { 0.21 } else { 0.0 };
            scene.set_translation(ObjectId(id), start + Vec3::new(shift, 0.5, 0.0));
        }
        assert_eq!(validate(&episode, &scene), Ok(true));
    }

    #[test]
    fn cleaning_fails_while_holding_an_object() {
        let episode = cleaning_episode();
        let mut scene = world(&episode);
        for id in 0..4 {
            let start = episode.objects[id as usize].position;
            scene.set_translation(ObjectId(id), start + Vec3::new(0.21, 0.0, 0.0));
        }
        assert_eq!(validate(&episode, &scene), Ok(true));

        agent_at(&mut scene, Vec3::new(0.21, 0.0, 4.0));
        assert_eq!(
            scene.grab_release(),
            crate::scene::GrabOutcome::Grabbed(ObjectId(0))
        );
        assert_eq!(validate(&episode, &scene), Ok(false));
    }

    #[test]
    fn cleaning_moved_and_lifted_counts_override_independently() {
        let mut task = descriptor(TaskType::Cleaning, None);
        task.min_objects_moved = Some(2);
        assert_eq!(
            TaskRules::from_descriptor(&task, false),
            TaskRules::Cleaning(CleaningRules {
                min_objects_moved: 2,
                ..CleaningRules::default()
            })
        );

        task.min_objects_lifted = Some(1);
        let TaskRules::Cleaning(rules) = TaskRules::from_descriptor(&task, false) else {
            panic!("cleaning descriptor must produce cleaning rules");
        };
        assert_eq!((rules.min_objects_moved, rules.min_objects_lifted), (2, 1));
    }

    fn objectnav_episode(is_thda: bool) -> Episode {
        let mut episode = episode(Vec::new(), Some(descriptor(TaskType::ObjectNav, None)));
        episode.is_thda = is_thda;
        episode.goals = Some(vec![ObjectGoal {
            object_id: None,
            position: Vec3::new(0.0, 0.0, 5.0),
            view_points: vec![ViewPoint {
                agent_state: ViewPointAgentState {
                    position: Vec3::new(0.0, 0.0, 1.0),
                },
            }],
        }]);
        episode
    }

    fn agent_at(scene: &mut SceneWorld, position: Vec3) {
        scene.set_agent(AgentState {
            position,
            rotation: Quat::IDENTITY,
        });
    }

    #[test]
    fn objectnav_boundary_is_strict() {
        let episode = objectnav_episode(false);
        let mut scene = world(&episode);

        agent_at(&mut scene, Vec3::new(0.1, 0.0, 1.0));
        assert_eq!(validate(&episode, &scene), Ok(false));

        agent_at(&mut scene, Vec3::new(0.0999, 0.0, 1.0));
        assert_eq!(validate(&episode, &scene), Ok(true));
    }

    #[test]
    fn objectnav_thda_uses_euclidean_distance_to_goal_center() {
        let episode = objectnav_episode(true);
        let mut scene = world(&episode);

        agent_at(&mut scene, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(validate(&episode, &scene), Ok(false));

        agent_at(&mut scene, Vec3::new(0.0, 0.5, 4.5));
        assert_eq!(validate(&episode, &scene), Ok(true));

        // Planar distance is 0.5 but height puts it past the threshold.
        agent_at(&mut scene, Vec3::new(0.0, 1.0, 4.5));
        assert_eq!(validate(&episode, &scene), Ok(false));
    }

    #[test]
    fn objectnav_without_goals_is_satisfied() {
        let episode = episode(Vec::new(), Some(descriptor(TaskType::ObjectNav, None)));
        assert_eq!(validate(&episode, &world(&episode)), Ok(true));
    }

    #[test]
    fn descriptor_overrides_replace_defaults() {
        let mut task = descriptor(TaskType::ObjectNavThda, None);
        task.success_distance = Some(2.0);
        assert_eq!(
            TaskRules::from_descriptor(&task, false),
            TaskRules::ObjectNav(ObjectNavRules {
                success_distance: 2.0,
                ..ObjectNavRules::THDA
            })
        );
    }
}
