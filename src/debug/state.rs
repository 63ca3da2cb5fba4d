//! Session data model (spec §3): pause-state machine and breakpoint
//! records. The `Transitioning` variant is mandatory — collapsing it into
//! `Running`/`Paused` would misreport the window between a CDP command's
//! acknowledgment and its matching event.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cdp::types::CallFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeIntent {
    Resume,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestingState {
    Paused,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseDetails {
    pub reason: String,
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub hit_breakpoints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    Starting,
    AwaitingDebugger,
    Running,
    Paused(PauseDetails),
    /// Do not optimize this away: callers must not assume a command's
    /// effect until the matching `Debugger.paused`/`resumed` event arrives.
    Transitioning {
        from: RestingState,
        intent: ResumeIntent,
    },
    Terminated {
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, SessionState::Paused(_))
    }
}

/// Exactly one of `url` or `script_id` is populated, per spec invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_id: Option<String>,
    pub line_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl BreakpointSpec {
    pub fn by_url(url: impl Into<String>, line_number: u32) -> Self {
        Self {
            url: Some(url.into()),
            script_id: None,
            line_number,
            column_number: None,
            condition: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub script_id: String,
    pub line_number: u32,
    pub column_number: u32,
}

/// A pending-upgrade reference kept until the backing script parses and a
/// source map resolves, matching it by exact URL, normalized absolute
/// path, `file://` form, or base name — first match wins.
#[derive(Debug, Clone)]
pub struct PendingUpgrade {
    pub breakpoint_id: String,
    pub spec: BreakpointSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointRecord {
    pub id: String,
    pub spec: BreakpointSpec,
    #[serde(default)]
    pub resolved: Vec<ResolvedLocation>,
}

impl BreakpointRecord {
    pub fn is_resolved(&self) -> bool {
        !self.resolved.is_empty()
    }
}

/// Owns the breakpoint table and resume/pause snapshot for one session.
/// Mutations are serialized by the session's own async task (see
/// `debug::session`) — this type carries no internal locking of its own.
#[derive(Debug, Clone)]
pub struct SessionModel {
    pub state: SessionState,
    pub breakpoints: HashMap<String, BreakpointRecord>,
    pub pending_upgrades: HashMap<String, PendingUpgrade>,
}

impl Default for SessionModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionModel {
    pub fn new() -> Self {
        Self {
            state: SessionState::Starting,
            breakpoints: HashMap::new(),
            pending_upgrades: HashMap::new(),
        }
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn add_breakpoint(&mut self, id: String, spec: BreakpointSpec, resolved: Vec<ResolvedLocation>) {
        self.breakpoints
            .insert(id.clone(), BreakpointRecord { id, spec, resolved });
    }

    pub fn remove_breakpoint(&mut self, id: &str) -> Option<BreakpointRecord> {
        self.breakpoints.remove(id)
    }

    pub fn list_breakpoints(&self) -> Vec<BreakpointRecord> {
        self.breakpoints.values().cloned().collect()
    }
}
