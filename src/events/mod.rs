//! Structured progress events.
//!
//! The daemon appends one JSON object per line to `*.jsonl` files in the
//! workspace's `logs/` directory. Viewers read those files independently of
//! the daemon, through `EventCursor`.

mod reader;
mod writer;

pub use reader::{
    EventCursor, StreamTiming, TailEnd, UpdateKind, WatchTarget, WorkspaceUpdate, interrupt_token, prune_logs,
    spawn_monitor, spawn_reader, tail, watch_workspaces,
};
pub use writer::EventWriter;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::daemon::RunResult;

/// Event type constants
pub mod event_types {
    pub const DAEMON_STARTED: &str = "daemon.started";
    pub const DAEMON_EXITED: &str = "daemon.exited";
    pub const ITERATION_STARTED: &str = "iteration.started";
    pub const PHASE_ENTERED: &str = "phase.entered";
    pub const AGENT_FAILED: &str = "agent.failed";
    pub const COMPLETION_IGNORED: &str = "completion.ignored";
    pub const LOOP_COMPLETE: &str = "loop.complete";
    pub const LOOP_FAILED: &str = "loop.failed";
    pub const LOOP_CANCELLED: &str = "loop.cancelled";
}

/// What the engine is doing during an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Story,
    QaVerify,
    QaFix,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Story => write!(f, "story"),
            Self::QaVerify => write!(f, "qa_verify"),
            Self::QaFix => write!(f, "qa_fix"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
    #[serde(default)]
    pub message: String,
}

/// One line of an event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Payload,
}

impl Event {
    pub fn new(event_type: &str, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp,
            payload: Payload {
                message: message.into(),
                ..Default::default()
            },
        }
    }

    pub fn iteration(mut self, iteration: u32, max_iterations: u32) -> Self {
        self.payload.iteration = Some(iteration);
        self.payload.max_iterations = Some(max_iterations);
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.payload.phase = Some(phase);
        self
    }

    pub fn story(mut self, story_id: impl Into<String>) -> Self {
        self.payload.story_id = Some(story_id.into());
        self
    }

    pub fn tests(mut self, test_ids: Vec<String>) -> Self {
        self.payload.test_ids = test_ids;
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.payload.pid = Some(pid);
        self
    }

    pub fn result(mut self, result: RunResult) -> Self {
        self.payload.result = Some(result);
        self
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        self.event_type == event_types::DAEMON_EXITED
    }

    /// One-line human rendering used by the plain-text tailer.
    pub fn summary(&self) -> String {
        let mut line = format!("{} ", self.timestamp.format("%H:%M:%S"));
        if let (Some(i), Some(max)) = (self.payload.iteration, self.payload.max_iterations) {
            line.push_str(&format!("[{}/{}] ", i, max));
        }
        if let Some(phase) = self.payload.phase {
            line.push_str(&format!("{}: ", phase));
        }
        line.push_str(&self.payload.message);
        line
    }
}

/// Destination for engine and daemon events.
pub trait EventSink: Send + Sync {
    /// Record an event. Failures are logged, never propagated.
    fn emit(&self, event: Event);

    /// Called before the first event of each iteration.
    fn begin_iteration(&self, _iteration: u32) {}
}

/// Discards everything; used by foreground runs without a log directory.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
