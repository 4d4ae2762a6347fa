use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::thread;

use engine::{
    load_episode, start_replay, EventLog, FlythroughReport, ManualClock, ReplayHandle,
    ReplayOutcome, SceneWorld, SessionError, TaskSession, TrialRecorder, WallClock, WorldTuning,
};
use serde::Serialize;
use tracing::{info, warn};

use super::bootstrap::PlayerConfig;
use super::PlayerError;

const DEFAULT_PHYSICS_STEP_SECONDS: f32 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandStatus {
    Success,
    TaskNotSatisfied,
}

#[derive(Debug, Serialize)]
struct ReplaySummary {
    events: usize,
    discarded_lines: usize,
    duration_ms: f64,
    by_kind: BTreeMap<String, usize>,
}

fn open_session(
    config: &PlayerConfig,
    episode_path: &Path,
) -> Result<TaskSession<SceneWorld>, PlayerError> {
    let episode_path = config.data_paths.resolve(episode_path);
    let episode = load_episode(&episode_path, config.episode_index)?;
    let scene = SceneWorld::from_episode(&episode, WorldTuning::default());
    Ok(TaskSession::new(episode, scene, config.inventory_slots))
}

fn write_report(out: &mut dyn Write, report: &FlythroughReport) -> Result<(), PlayerError> {
    let outcome = match report.outcome {
        ReplayOutcome::Completed => "completed",
        ReplayOutcome::Cancelled => "cancelled",
    };
    writeln!(out, "replay: {outcome}")?;
    writeln!(out, "events fired: {}", report.metrics.events_fired)?;
    writeln!(
        out,
        "physics entries: {} applied, {} skipped",
        report.metrics.physics_entries_applied, report.metrics.physics_entries_skipped
    )?;
    writeln!(out, "task satisfied: {}", report.task_satisfied)?;
    Ok(())
}

/// Cancels `handle` when a line reading `q` arrives on stdin.
fn spawn_stdin_canceller(handle: ReplayHandle) -> io::Result<()> {
    thread::Builder::new()
        .name("stdin-cancel".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().eq_ignore_ascii_case("q") {
                    if handle.cancel() {
                        info!("replay_cancel_requested");
                    }
                    break;
                }
                if handle.is_finished() {
                    break;
                }
            }
        })
        .map(|_| ())
}

pub(crate) fn play(
    config: &PlayerConfig,
    episode_path: &Path,
    replay_path: &Path,
    out: &mut dyn Write,
) -> Result<CommandStatus, PlayerError> {
    let mut session = open_session(config, episode_path)?;
    let log = session.load_replay(&config.data_paths.resolve(replay_path))?;
    let scheduler = start_replay(&log, config.playback.clone())?;

    if let Err(error) = spawn_stdin_canceller(scheduler.handle()) {
        warn!(%error, "stdin_cancel_unavailable");
    }
    writeln!(
        out,
        "playing {} event(s) over {:.0} ms at {}x; type q + Enter to stop",
        log.len(),
        log.duration_ms() / config.playback.speed,
        config.playback.speed
    )?;

    let mut clock = WallClock::start(config.playback.sleep_slice);
    let report = session.run_flythrough(scheduler, &mut clock)?;
    write_report(out, &report)?;
    Ok(CommandStatus::Success)
}

pub(crate) fn validate(
    config: &PlayerConfig,
    episode_path: &Path,
    replay_path: &Path,
    out: &mut dyn Write,
) -> Result<CommandStatus, PlayerError> {
    let mut session = open_session(config, episode_path)?;
    let log = session.load_replay(&config.data_paths.resolve(replay_path))?;
    let scheduler = start_replay(&log, config.playback.clone())?;

    let report = session.run_flythrough(scheduler, &mut ManualClock::new())?;
    write_report(out, &report)?;
    Ok(if report.task_satisfied {
        CommandStatus::Success
    } else {
        CommandStatus::TaskNotSatisfied
    })
}

pub(crate) fn inspect(
    config: &PlayerConfig,
    replay_path: &Path,
    json: bool,
    out: &mut dyn Write,
) -> Result<CommandStatus, PlayerError> {
    let log = EventLog::from_path(&config.data_paths.resolve(replay_path))?;
    let mut by_kind = BTreeMap::<String, usize>::new();
    for event in log.events() {
        *by_kind.entry(event.kind.label().to_string()).or_default() += 1;
    }
    let summary = ReplaySummary {
        events: log.len(),
        discarded_lines: log.discarded_lines(),
        duration_ms: log.duration_ms(),
        by_kind,
    };

    if json {
        serde_json::to_writer_pretty(&mut *out, &summary)?;
        writeln!(out)?;
    } else {
        writeln!(out, "events: {}", summary.events)?;
        writeln!(out, "discarded lines: {}", summary.discarded_lines)?;
        writeln!(out, "duration: {:.0} ms", summary.duration_ms)?;
        for (kind, count) in &summary.by_kind {
            writeln!(out, "  {kind}: {count}")?;
        }
    }
    Ok(CommandStatus::Success)
}

/// Drives a live session from `input`, one command per line, and saves the
/// trial record to `output_path` when input ends or `q` arrives.
pub(crate) fn record(
    config: &PlayerConfig,
    episode_path: &Path,
    output_path: &Path,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> Result<CommandStatus, PlayerError> {
    let mut session =
        open_session(config, episode_path)?.with_recorder(TrialRecorder::default());

    for line in input.lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        match command {
            "q" | "quit" => break,
            "reset" => session.reset(),
            "step" => {
                let seconds = match words.next().map(str::parse::<f32>) {
                    None => DEFAULT_PHYSICS_STEP_SECONDS,
                    Some(Ok(seconds)) if seconds.is_finite() && seconds > 0.0 => seconds,
                    Some(_) => {
                        writeln!(out, "step expects a positive number of seconds")?;
                        continue;
                    }
                };
                session.step_physics(seconds);
            }
            name => match session.handle_action_name(name) {
                Ok(_) => {}
                Err(SessionError::UnknownAction(error)) => {
                    warn!(%error, "record_input_ignored");
                    writeln!(out, "{error}")?;
                    continue;
                }
                Err(error) => return Err(error.into()),
            },
        }
        writeln!(out, "{}", session.status().text)?;
    }

    let output_path = config.data_paths.resolve(output_path);
    let records = match session.take_recorder() {
        Some(recorder) => {
            recorder.save(&output_path)?;
            recorder.records().len()
        }
        None => 0,
    };
    writeln!(
        out,
        "saved {records} record(s) to {}; task completed: {}",
        output_path.display(),
        session.is_task_completed()
    )?;
    Ok(CommandStatus::Success)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use engine::{resolve_data_paths, PlaybackConfig, DEFAULT_INVENTORY_SLOTS};
    use serde_json::json;

    use super::*;

    const REPLAY: &str = "\
TEST,simInitialized,900,\"{\"\"config\"\":{}}\"
TEST,viewerStart,1000,\"{\"\"step\"\":\"\"viewer\"\"}\"
TEST,handleAction,1100,\"{\"\"action\"\":\"\"moveForward\"\"}\"
TEST,handleAction,1200,\"{\"\"action\"\":\"\"moveForward\"\"}\"
TEST,stepPhysics,1300,\"{\"\"step\"\":0.1,\"\"objectStates\"\":[{\"\"objectId\"\":0,\"\"translation\"\":[0.0,0.0,-0.5],\"\"rotation\"\":[0.0,0.0,0.0,1.0]}]}\"
";

    fn fixture(goal_z: f32) -> (tempfile::TempDir, PlayerConfig) {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("tasks")).expect("tasks");
        fs::create_dir_all(dir.path().join("replays")).expect("replays");
        let episode = json!({
            "episodes": [{
                "start_position": [0.0, 0.0, 0.0],
                "start_rotation": [0.0, 0.0, 0.0, 1.0],
                "objects": [{ "objectId": 0, "position": [3.0, 0.0, 3.0] }],
                "task": { "type": "objectnav" },
                "goals": [{
                    "position": [0.0, 0.0, goal_z],
                    "view_points": [{ "agent_state": { "position": [0.0, 0.0, goal_z] } }]
                }]
            }]
        });
        fs::write(dir.path().join("tasks").join("nav.json"), episode.to_string()).expect("episode");
        fs::write(dir.path().join("replays").join("run.csv"), REPLAY).expect("replay");

        let config = PlayerConfig {
            data_paths: resolve_data_paths(Some(dir.path())).expect("paths"),
            playback: PlaybackConfig::default(),
            episode_index: 0,
            inventory_slots: DEFAULT_INVENTORY_SLOTS,
        };
        (dir, config)
    }

    #[test]
    fn validate_reports_success_when_agent_reaches_viewpoint() {
        let (_dir, config) = fixture(-0.5);
        let mut out = Vec::new();
        let status = validate(
            &config,
            Path::new("nav.json"),
            Path::new("run.csv"),
            &mut out,
        )
        .expect("validate");

        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(status, CommandStatus::Success);
        assert!(text.contains("replay: completed"), "{text}");
        assert!(text.contains("events fired: 4"), "{text}");
        assert!(text.contains("physics entries: 1 applied, 0 skipped"), "{text}");
        assert!(text.contains("task satisfied: true"), "{text}");
    }

    #[test]
    fn validate_reports_unsatisfied_task() {
        let (_dir, config) = fixture(-3.0);
        let mut out = Vec::new();
        let status = validate(
            &config,
            Path::new("tasks/nav.json"),
            Path::new("replays/run.csv"),
            &mut out,
        )
        .expect("validate");
        assert_eq!(status, CommandStatus::TaskNotSatisfied);
    }

    #[test]
    fn inspect_summarizes_event_kinds() {
        let (_dir, config) = fixture(0.0);
        let mut out = Vec::new();
        inspect(&config, Path::new("run.csv"), true, &mut out).expect("inspect");

        let summary: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(summary["events"], 4);
        assert_eq!(summary["discarded_lines"], 1);
        assert_eq!(summary["duration_ms"], 300.0);
        assert_eq!(summary["by_kind"]["handleAction"], 2);
        assert_eq!(summary["by_kind"]["viewerStart"], 1);
    }

    #[test]
    fn recorded_session_replays_to_the_same_result() {
        let (dir, config) = fixture(-0.5);
        let mut input = io::Cursor::new("moveForward\nhover\nmoveForward\nstep 0.1\nq\nturnLeft\n");
        let mut out = Vec::new();
        record(
            &config,
            Path::new("nav.json"),
            Path::new("replays/recorded.csv"),
            &mut input,
            &mut out,
        )
        .expect("record");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("unknown agent action 'hover'"), "{text}");
        assert!(text.contains("saved 4 record(s)"), "{text}");

        let saved = dir.path().join("replays").join("recorded.csv");
        let log = EventLog::from_path(&saved).expect("parse saved record");
        let labels = log
            .events()
            .iter()
            .map(|event| event.kind.label().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec!["viewerStart", "handleAction", "handleAction", "stepPhysics"]
        );

        let mut replay_out = Vec::new();
        let status = validate(
            &config,
            Path::new("nav.json"),
            &saved,
            &mut replay_out,
        )
        .expect("validate");
        assert_eq!(status, CommandStatus::Success);
    }

    #[test]
    fn missing_episode_is_an_error() {
        let (_dir, config) = fixture(0.0);
        let mut out = Vec::new();
        let result = validate(
            &config,
            Path::new("absent.json"),
            Path::new("run.csv"),
            &mut out,
        );
        assert!(matches!(result, Err(PlayerError::Episode(_))));
    }
}
