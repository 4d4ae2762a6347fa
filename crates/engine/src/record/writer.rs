use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tracing::info;

use super::types::VIEWER_SENTINEL;

pub const DEFAULT_PHASE: &str = "TEST";
pub const EVENT_VIEWER_START: &str = "viewerStart";

#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub phase: String,
    pub event: String,
    pub timestamp_ms: f64,
    pub data: Value,
    viewer_sentinel: bool,
}

impl TrialRecord {
    fn envelope(&self) -> Value {
        let mut envelope = json!({
            "phase": self.phase,
            "event": self.event,
            "data": self.data,
        });
        if self.viewer_sentinel {
            envelope["step"] = Value::String(VIEWER_SENTINEL.to_string());
        }
        envelope
    }

    /// One line of the persisted replay format with a CSV-quoted payload.
    pub fn to_line(&self) -> String {
        let payload = self.envelope().to_string().replace('"', "\"\"");
        format!(
            "{},{},{},\"{}\"",
            self.phase, self.event, self.timestamp_ms, payload
        )
    }
}

/// Collects trial events during a live session in the format the replay
/// parser consumes.
#[derive(Debug, Clone)]
pub struct TrialRecorder {
    phase: String,
    records: Vec<TrialRecord>,
}

impl Default for TrialRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_PHASE)
    }
}

impl TrialRecorder {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Writes the line replays start from.
    pub fn mark_viewer_start(&mut self) {
        let timestamp_ms = self.next_timestamp(wall_clock_ms());
        self.push(EVENT_VIEWER_START, timestamp_ms, json!({}), true);
    }

    pub fn record(&mut self, event: &str, data: Value) {
        let timestamp_ms = self.next_timestamp(wall_clock_ms());
        self.push(event, timestamp_ms, data, false);
    }

    /// Records with an explicit timestamp; later records never go earlier
    /// than the last one written.
    pub fn record_at(&mut self, timestamp_ms: f64, event: &str, data: Value) {
        let timestamp_ms = self.next_timestamp(timestamp_ms);
        self.push(event, timestamp_ms, data, false);
    }

    pub fn mark_viewer_start_at(&mut self, timestamp_ms: f64) {
        let timestamp_ms = self.next_timestamp(timestamp_ms);
        self.push(EVENT_VIEWER_START, timestamp_ms, json!({}), true);
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        for record in &self.records {
            output.push_str(&record.to_line());
            output.push('\n');
        }
        output
    }

    /// Writes the rendered record next to `path` and renames it into place.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(path);
        fs::write(&partial, self.render())?;
        if let Err(error) = fs::rename(&partial, path) {
            let _ = fs::remove_file(&partial);
            return Err(error);
        }
        info!(
            path = %path.display(),
            records = self.records.len(),
            "trial_record_saved"
        );
        Ok(())
    }

    fn next_timestamp(&self, candidate_ms: f64) -> f64 {
        match self.records.last() {
            Some(last) if last.timestamp_ms > candidate_ms => last.timestamp_ms,
            _ => candidate_ms,
        }
    }

    fn push(&mut self, event: &str, timestamp_ms: f64, data: Value, viewer_sentinel: bool) {
        self.records.push(TrialRecord {
            phase: self.phase.clone(),
            event: event.to_string(),
            timestamp_ms,
            data,
            viewer_sentinel,
        });
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn wall_clock_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as f64)
        .unwrap_or(0.0)
}
