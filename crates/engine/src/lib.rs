use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod episode;
pub mod input;
pub mod inventory;
pub mod math;
pub mod playback;
pub mod record;
pub mod scene;
pub mod session;
pub mod validator;

pub use episode::{
    load_episode, parse_episode_json, Episode, EpisodeLoadError, EpisodeObjectState, ObjectGoal,
    RadarGoal, TaskDescriptor, TaskGoals, TaskType,
};
pub use input::{
    action_for_key_code, AgentAction, InputGate, InputSuspension, KeyBinding,
    UnknownActionError, DEFAULT_KEY_BINDINGS,
};
pub use inventory::{Inventory, InventoryItem, DEFAULT_INVENTORY_SLOTS};
pub use math::{Quat, Vec3};
pub use playback::{
    apply_physics_step, start_replay, ManualClock, PhysicsStepReport, PlaybackClock,
    PlaybackConfig, PlaybackError, PlaybackMetrics, PlaybackMetricsHandle, ReplayHandle,
    ReplayHandlers, ReplayOutcome, ReplayScheduler, WallClock,
};
pub use record::{
    unescape_payload, EventLog, ObjectState, RecordParseError, RecordedEvent, RecordedEventKind,
    TrialRecorder,
};
pub use scene::{
    AgentId, AgentState, GrabOutcome, ObjectId, SceneControl, SceneObjectRecord, SceneView,
    SceneWorld, WorldTuning,
};
pub use session::{
    FlythroughReport, SessionError, Status, StatusLevel, TaskSession, TASK_COMPLETED_STATUS,
};
pub use validator::{validate, TaskRules, TaskValidator, ValidationError};

pub const DATA_ROOT_ENV_VAR: &str = "FLYTHROUGH_DATA_ROOT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    pub tasks_dir: PathBuf,
    pub replays_dir: PathBuf,
}

impl DataPaths {
    /// Resolves `path` against the data root unless it is absolute. A bare
    /// file name that only exists under `tasks/` or `replays/` is found there.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let direct = self.root.join(path);
        if direct.exists() {
            return direct;
        }
        [&self.tasks_dir, &self.replays_dir]
            .into_iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
            .unwrap_or(direct)
    }
}

#[derive(Debug, Error)]
pub enum DataRootError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
    #[error(
        "data root is not a directory: {path}\n\
Pass --data-root or set {env_var} to the directory holding tasks/ and replays/."
    )]
    NotADirectory {
        path: PathBuf,
        env_var: &'static str,
    },
}

/// Picks the data root: explicit override, then the environment, then the
/// current directory.
pub fn resolve_data_paths(explicit_root: Option<&Path>) -> Result<DataPaths, DataRootError> {
    let root = match explicit_root {
        Some(root) => root.to_path_buf(),
        None => match env::var(DATA_ROOT_ENV_VAR) {
            Ok(value) => PathBuf::from(value),
            Err(env::VarError::NotPresent) => {
                env::current_dir().map_err(DataRootError::CurrentDir)?
            }
            Err(source) => {
                return Err(DataRootError::EnvVar {
                    var: DATA_ROOT_ENV_VAR,
                    source,
                })
            }
        },
    };
    data_paths_for(&root)
}

fn data_paths_for(root: &Path) -> Result<DataPaths, DataRootError> {
    let root = normalize_path(root);
    if !root.is_dir() {
        return Err(DataRootError::NotADirectory {
            path: root,
            env_var: DATA_ROOT_ENV_VAR,
        });
    }
    Ok(DataPaths {
        tasks_dir: root.join("tasks"),
        replays_dir: root.join("replays"),
        root,
    })
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_root_must_be_a_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("definitely_not_a_root");
        assert!(matches!(
            resolve_data_paths(Some(&missing)),
            Err(DataRootError::NotADirectory { .. })
        ));
    }

    #[test]
    fn bare_names_fall_back_to_tasks_and_replays() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("replays")).expect("replays dir");
        fs::write(dir.path().join("replays").join("run.csv"), "").expect("write");

        let paths = resolve_data_paths(Some(dir.path())).expect("paths");
        assert_eq!(
            paths.resolve(Path::new("run.csv")),
            paths.replays_dir.join("run.csv")
        );
        assert_eq!(
            paths.resolve(Path::new("tasks/missing.json")),
            paths.root.join("tasks/missing.json")
        );
    }
}
