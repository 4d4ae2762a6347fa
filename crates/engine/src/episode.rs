use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::math::{Quat, Vec3};
use crate::scene::ObjectId;

/// Start pose used when no episode file is configured.
const FALLBACK_START_POSITION: Vec3 = Vec3::new(-1.267_663_4, 0.204_785_29, 12.595_428);
const FALLBACK_START_ROTATION: Quat = Quat::from_coeffs(0.0, 0.453_638_5, 0.0, 0.891_185_8);
const FALLBACK_GOAL_POSITION: Vec3 = Vec3::new(2.289_681_2, 0.119_503_81, 16.976_366);

#[derive(Debug, Error)]
pub enum EpisodeLoadError {
    #[error("failed to read episode file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse episode file {path} at {json_path}: {source}")]
    Parse {
        path: PathBuf,
        json_path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("episode file {path} has {count} episode(s); index {index} is out of range")]
    IndexOutOfRange {
        path: PathBuf,
        index: usize,
        count: usize,
    },
    #[error("episode {index} in {path} is invalid: {message}")]
    Invalid {
        path: PathBuf,
        index: usize,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TaskType {
    #[serde(rename = "arrangement")]
    Arrangement,
    #[serde(rename = "cleaning")]
    Cleaning,
    #[serde(rename = "objectnav")]
    ObjectNav,
    #[serde(rename = "objectnav-thda")]
    ObjectNavThda,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskGoals {
    /// Source object index (into the scene's object list) to the indices of
    /// receptacles it may be placed on.
    #[serde(
        default,
        rename = "objectToReceptacleMap",
        alias = "objectToGoalMap"
    )]
    pub object_to_receptacle_map: Option<BTreeMap<usize, Vec<usize>>>,
}

/// Task attached to an episode. Threshold fields override the rule defaults
/// of the task type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub goals: Option<TaskGoals>,
    #[serde(default)]
    pub distance_threshold: Option<f32>,
    #[serde(default)]
    pub require_on_top: Option<bool>,
    #[serde(default)]
    pub started_threshold: Option<f32>,
    #[serde(default)]
    pub moved_threshold: Option<f32>,
    #[serde(default)]
    pub lifted_threshold: Option<f32>,
    #[serde(default)]
    pub min_objects_moved: Option<usize>,
    #[serde(default)]
    pub min_objects_lifted: Option<usize>,
    #[serde(default)]
    pub success_distance: Option<f32>,
}

/// Initial placement of one episode object. Never changes after load.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeObjectState {
    pub object_id: ObjectId,
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    #[serde(default)]
    pub object_handle: Option<String>,
    #[serde(default)]
    pub object_icon: Option<String>,
    #[serde(default)]
    pub bounding_box_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ViewPointAgentState {
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ViewPoint {
    pub agent_state: ViewPointAgentState,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectGoal {
    #[serde(default)]
    pub object_id: Option<ObjectId>,
    pub position: Vec3,
    #[serde(default)]
    pub view_points: Vec<ViewPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RadarGoal {
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub episode_id: Option<String>,
    #[serde(default)]
    pub scene_id: Option<String>,
    #[serde(default)]
    pub start_position: Vec3,
    #[serde(default)]
    pub start_rotation: Quat,
    #[serde(default)]
    pub objects: Vec<EpisodeObjectState>,
    #[serde(default)]
    pub task: Option<TaskDescriptor>,
    #[serde(default)]
    pub goals: Option<Vec<ObjectGoal>>,
    #[serde(default)]
    pub is_thda: bool,
    #[serde(default)]
    pub goal: Option<RadarGoal>,
}

#[derive(Debug, Deserialize)]
struct EpisodeFile {
    episodes: Vec<Episode>,
}

impl Episode {
    /// Empty scene with the demo start pose and radar goal.
    pub fn fallback() -> Self {
        Self {
            episode_id: None,
            scene_id: None,
            start_position: FALLBACK_START_POSITION,
            start_rotation: FALLBACK_START_ROTATION,
            objects: Vec::new(),
            task: None,
            goals: None,
            is_thda: false,
            goal: Some(RadarGoal {
                position: FALLBACK_GOAL_POSITION,
            }),
        }
    }
}

pub fn load_episode(path: &Path, index: usize) -> Result<Episode, EpisodeLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| EpisodeLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let episode = parse_episode_json(&raw, index, path)?;
    info!(
        path = %path.display(),
        index,
        objects = episode.objects.len(),
        task = ?episode.task.as_ref().map(|task| task.task_type),
        "episode_loaded"
    );
    Ok(episode)
}

pub fn parse_episode_json(
    raw: &str,
    index: usize,
    path: &Path,
) -> Result<Episode, EpisodeLoadError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let file = serde_path_to_error::deserialize::<_, EpisodeFile>(&mut deserializer).map_err(
        |error| {
            let json_path = error.path().to_string();
            EpisodeLoadError::Parse {
                path: path.to_path_buf(),
                json_path,
                source: error.into_inner(),
            }
        },
    )?;

    let count = file.episodes.len();
    let episode = file
        .episodes
        .into_iter()
        .nth(index)
        .ok_or_else(|| EpisodeLoadError::IndexOutOfRange {
            path: path.to_path_buf(),
            index,
            count,
        })?;
    validate_episode(&episode).map_err(|message| EpisodeLoadError::Invalid {
        path: path.to_path_buf(),
        index,
        message,
    })?;
    Ok(episode)
}

fn validate_episode(episode: &Episode) -> Result<(), String> {
    if !episode.start_position.is_finite() {
        return Err("start_position must be finite".to_string());
    }
    let mut seen = HashSet::with_capacity(episode.objects.len());
    for (slot, object) in episode.objects.iter().enumerate() {
        if !seen.insert(object.object_id) {
            return Err(format!(
                "objects[{slot}] repeats objectId {}",
                object.object_id
            ));
        }
        if !object.position.is_finite() {
            return Err(format!("objects[{slot}].position must be finite"));
        }
    }
    Ok(())
}
