//! Persisted replay records: `phase,event,timestamp,payload` lines.

mod event_log;
mod types;
mod writer;

pub use event_log::{unescape_payload, EventLog, RecordParseError};
pub use types::{
    ObjectState, RecordedEvent, RecordedEventKind, EVENT_HANDLE_ACTION, EVENT_SIM_RESET,
    EVENT_STEP_PHYSICS, VIEWER_SENTINEL,
};
pub use writer::{TrialRecord, TrialRecorder, DEFAULT_PHASE, EVENT_VIEWER_START};
