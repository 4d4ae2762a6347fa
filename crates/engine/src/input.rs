use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentAction {
    MoveForward,
    MoveBackward,
    TurnLeft,
    TurnRight,
    LookUp,
    LookDown,
    GrabReleaseObject,
    AddPrimitiveObject,
    AddTemplateObject,
    RemoveLastObject,
}

const ACTION_COUNT: usize = 10;

impl AgentAction {
    pub const ALL: [AgentAction; ACTION_COUNT] = [
        AgentAction::MoveForward,
        AgentAction::MoveBackward,
        AgentAction::TurnLeft,
        AgentAction::TurnRight,
        AgentAction::LookUp,
        AgentAction::LookDown,
        AgentAction::GrabReleaseObject,
        AgentAction::AddPrimitiveObject,
        AgentAction::AddTemplateObject,
        AgentAction::RemoveLastObject,
    ];

    /// Name used in recorded `handleAction` payloads.
    pub const fn name(self) -> &'static str {
        match self {
            AgentAction::MoveForward => "moveForward",
            AgentAction::MoveBackward => "moveBackward",
            AgentAction::TurnLeft => "turnLeft",
            AgentAction::TurnRight => "turnRight",
            AgentAction::LookUp => "lookUp",
            AgentAction::LookDown => "lookDown",
            AgentAction::GrabReleaseObject => "grabReleaseObject",
            AgentAction::AddPrimitiveObject => "addPrimitiveObject",
            AgentAction::AddTemplateObject => "addTemplateObject",
            AgentAction::RemoveLastObject => "removeLastObject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown agent action '{0}'")]
pub struct UnknownActionError(pub String);

impl FromStr for AgentAction {
    type Err = UnknownActionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        AgentAction::ALL
            .into_iter()
            .find(|action| action.name() == name)
            .ok_or_else(|| UnknownActionError(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding {
    pub key: &'static str,
    pub key_code: u32,
    pub action: AgentAction,
}

pub const DEFAULT_KEY_BINDINGS: [KeyBinding; 9] = [
    KeyBinding {
        key: "w",
        key_code: 87,
        action: AgentAction::MoveForward,
    },
    KeyBinding {
        key: "s",
        key_code: 83,
        action: AgentAction::MoveBackward,
    },
    KeyBinding {
        key: "ArrowLeft",
        key_code: 37,
        action: AgentAction::TurnLeft,
    },
    KeyBinding {
        key: "ArrowRight",
        key_code: 39,
        action: AgentAction::TurnRight,
    },
    KeyBinding {
        key: "a",
        key_code: 65,
        action: AgentAction::TurnLeft,
    },
    KeyBinding {
        key: "d",
        key_code: 68,
        action: AgentAction::TurnRight,
    },
    KeyBinding {
        key: "ArrowUp",
        key_code: 38,
        action: AgentAction::LookUp,
    },
    KeyBinding {
        key: "ArrowDown",
        key_code: 40,
        action: AgentAction::LookDown,
    },
    KeyBinding {
        key: " ",
        key_code: 32,
        action: AgentAction::GrabReleaseObject,
    },
];

pub fn action_for_key_code(key_code: u32) -> Option<AgentAction> {
    DEFAULT_KEY_BINDINGS
        .iter()
        .find(|binding| binding.key_code == key_code)
        .map(|binding| binding.action)
}

#[derive(Debug)]
struct GateState {
    enabled: AtomicBool,
    reenable_count: AtomicU64,
}

/// Whether live key input reaches the session. Replays hold an
/// [`InputSuspension`] for their whole run.
#[derive(Debug, Clone)]
pub struct InputGate {
    state: Arc<GateState>,
}

impl Default for InputGate {
    fn default() -> Self {
        Self {
            state: Arc::new(GateState {
                enabled: AtomicBool::new(true),
                reenable_count: AtomicU64::new(0),
            }),
        }
    }
}

impl InputGate {
    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::Acquire)
    }

    /// Number of times a suspension has handed input back.
    pub fn reenable_count(&self) -> u64 {
        self.state.reenable_count.load(Ordering::Acquire)
    }

    /// Disables input until the returned guard drops. Input is only
    /// re-enabled if it was enabled when the suspension began.
    pub fn suspend(&self) -> InputSuspension {
        let was_enabled = self.state.enabled.swap(false, Ordering::AcqRel);
        debug!(was_enabled, "input_suspended");
        InputSuspension {
            state: Arc::clone(&self.state),
            restore: was_enabled,
        }
    }
}

#[derive(Debug)]
pub struct InputSuspension {
    state: Arc<GateState>,
    restore: bool,
}

impl Drop for InputSuspension {
    fn drop(&mut self) {
        if self.restore {
            self.state.enabled.store(true, Ordering::Release);
            self.state.reenable_count.fetch_add(1, Ordering::AcqRel);
            debug!("input_restored");
        }
    }
}
