use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{
    ActionPayload, PhysicsStepPayload, RecordedEvent, RecordedEventKind, EVENT_HANDLE_ACTION,
    EVENT_SIM_RESET, EVENT_STEP_PHYSICS, VIEWER_SENTINEL,
};

#[derive(Debug, Error)]
pub enum RecordParseError {
    #[error("failed to read replay record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: expected phase,event,timestamp,payload but found {found} field(s)")]
    MissingFields { line: usize, found: usize },
    #[error("line {line}: timestamp '{raw}' is not a finite number")]
    InvalidTimestamp { line: usize, raw: String },
    #[error(
        "line {line}: timestamp {timestamp_ms} is earlier than the previous event at {previous_ms}"
    )]
    TimestampWentBackwards {
        line: usize,
        timestamp_ms: f64,
        previous_ms: f64,
    },
    #[error("line {line}: malformed JSON payload: {source}")]
    MalformedPayload {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: invalid {event} payload at {path}: {source}")]
    InvalidEventPayload {
        line: usize,
        event: String,
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Replay record parsed into file-ordered events relative to the viewer
/// sentinel line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: Vec<RecordedEvent>,
    discarded_lines: usize,
}

impl EventLog {
    pub fn from_path(path: &Path) -> Result<Self, RecordParseError> {
        let raw = fs::read_to_string(path).map_err(|source| RecordParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(text: &str) -> Result<Self, RecordParseError> {
        let mut events = Vec::new();
        let mut discarded_lines = 0usize;
        let mut start_timestamp_ms: Option<f64> = None;
        let mut previous_ms = 0.0f64;

        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            if raw_line.trim().is_empty() {
                continue;
            }

            let start_ms = match start_timestamp_ms {
                Some(start_ms) => start_ms,
                None => match sentinel_fields(raw_line) {
                    Some(raw) => {
                        let timestamp_ms = parse_timestamp(raw.timestamp).ok_or_else(|| {
                            RecordParseError::InvalidTimestamp {
                                line,
                                raw: raw.timestamp.to_string(),
                            }
                        })?;
                        start_timestamp_ms = Some(timestamp_ms);
                        timestamp_ms
                    }
                    None => {
                        discarded_lines += 1;
                        continue;
                    }
                },
            };

            let event = parse_in_scope_line(raw_line, line, start_ms)?;
            if event.relative_timestamp_ms < previous_ms {
                return Err(RecordParseError::TimestampWentBackwards {
                    line,
                    timestamp_ms: event.relative_timestamp_ms + start_ms,
                    previous_ms: previous_ms + start_ms,
                });
            }
            previous_ms = event.relative_timestamp_ms;
            events.push(event);
        }

        if start_timestamp_ms.is_none() {
            warn!(discarded_lines, "replay_record_missing_viewer_sentinel");
        }
        debug!(
            events = events.len(),
            discarded_lines, "replay_record_parsed"
        );

        Ok(Self {
            events,
            discarded_lines,
        })
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Lines skipped before the viewer sentinel.
    pub fn discarded_lines(&self) -> usize {
        self.discarded_lines
    }

    /// Relative timestamp of the last event, or zero for an empty log.
    pub fn duration_ms(&self) -> f64 {
        self.events
            .last()
            .map(|event| event.relative_timestamp_ms)
            .unwrap_or(0.0)
    }

    /// `(delay, event)` pairs in file order. Each call starts over from the
    /// first in-scope event.
    pub fn timeline(&self, speed: f64) -> impl Iterator<Item = (Duration, &RecordedEvent)> + '_ {
        self.events.iter().map(move |event| (event.delay(speed), event))
    }
}

/// Strips one pair of surrounding quotes and collapses doubled quotes, the
/// CSV quoting applied to payload fields. Unquoted input is returned as is.
pub fn unescape_payload(raw: &str) -> Cow<'_, str> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        Cow::Owned(raw[1..raw.len() - 1].replace("\"\"", "\""))
    } else {
        Cow::Borrowed(raw)
    }
}

struct RawLine<'a> {
    phase: &'a str,
    event_name: &'a str,
    timestamp: &'a str,
    payload: &'a str,
}

fn split_line(line: &str) -> Result<RawLine<'_>, usize> {
    let mut parts = line.splitn(4, ',');
    let phase = parts.next();
    let event_name = parts.next();
    let timestamp = parts.next();
    let payload = parts.next();
    match (phase, event_name, timestamp, payload) {
        (Some(phase), Some(event_name), Some(timestamp), Some(payload)) => Ok(RawLine {
            phase,
            event_name,
            timestamp,
            payload,
        }),
        _ => Err(line.split(',').count()),
    }
}

fn parse_timestamp(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_matches('"');
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn is_sentinel(payload: &Value) -> bool {
    payload.get("step").and_then(Value::as_str) == Some(VIEWER_SENTINEL)
}

/// Fields of `line` if its payload marks the viewer sentinel. Only the
/// payload decides; a payload that does not decode is not the sentinel.
fn sentinel_fields(line: &str) -> Option<RawLine<'_>> {
    let raw = split_line(line).ok()?;
    let payload = serde_json::from_str::<Value>(&unescape_payload(raw.payload)).ok()?;
    is_sentinel(&payload).then_some(raw)
}

fn parse_in_scope_line(
    line_text: &str,
    line: usize,
    start_timestamp_ms: f64,
) -> Result<RecordedEvent, RecordParseError> {
    let raw =
        split_line(line_text).map_err(|found| RecordParseError::MissingFields { line, found })?;
    let timestamp_ms =
        parse_timestamp(raw.timestamp).ok_or_else(|| RecordParseError::InvalidTimestamp {
            line,
            raw: raw.timestamp.to_string(),
        })?;
    let payload = serde_json::from_str::<Value>(&unescape_payload(raw.payload))
        .map_err(|source| RecordParseError::MalformedPayload { line, source })?;

    // Trial-logger envelopes carry the event name and data inside the payload.
    let envelope_event = payload
        .get("event")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let kind = match envelope_event {
        Some(event_name) => {
            let data = payload.get("data").cloned().unwrap_or(Value::Null);
            decode_kind(&event_name, &data, line)?
        }
        None if is_sentinel(&payload) => RecordedEventKind::Marker {
            event_name: raw.event_name.to_string(),
        },
        None => decode_kind(raw.event_name, &payload, line)?,
    };

    Ok(RecordedEvent {
        relative_timestamp_ms: timestamp_ms - start_timestamp_ms,
        phase: raw.phase.to_string(),
        line_number: line,
        kind,
    })
}

fn decode_kind(
    event_name: &str,
    data: &Value,
    line: usize,
) -> Result<RecordedEventKind, RecordParseError> {
    match event_name {
        EVENT_SIM_RESET => Ok(RecordedEventKind::Reset),
        EVENT_HANDLE_ACTION => {
            let payload: ActionPayload = decode_payload(event_name, data, line)?;
            Ok(RecordedEventKind::ActionTaken {
                action_name: payload.action,
            })
        }
        EVENT_STEP_PHYSICS => {
            let payload: PhysicsStepPayload = decode_payload(event_name, data, line)?;
            Ok(RecordedEventKind::PhysicsStep {
                step_size: payload.step,
                object_states: payload.object_states,
            })
        }
        other => Ok(RecordedEventKind::Marker {
            event_name: other.to_string(),
        }),
    }
}

fn decode_payload<T: DeserializeOwned>(
    event_name: &str,
    data: &Value,
    line: usize,
) -> Result<T, RecordParseError> {
    serde_path_to_error::deserialize::<_, T>(data).map_err(|error| {
        let path = error.path().to_string();
        RecordParseError::InvalidEventPayload {
            line,
            event: event_name.to_string(),
            path,
            source: error.into_inner(),
        }
    })
}
