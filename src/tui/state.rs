//! Dashboard state.
//!
//! One `Pane` per watched workspace, fed by `WorkspaceUpdate`s from the
//! event readers. Nothing here touches the terminal.

use std::collections::VecDeque;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::daemon::RunResult;
use crate::events::{Event, Phase, UpdateKind, WorkspaceUpdate, event_types};

/// Lifecycle of the daemon behind a pane, as seen through its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneStatus {
    /// No event seen yet
    Waiting,
    Running,
    /// Daemon wrote its exit event
    Finished(RunResult),
    /// Reader stopped without an exit event
    Gone,
}

impl PaneStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Finished(RunResult::Success) => "success",
            Self::Finished(RunResult::Failed) => "failed",
            Self::Finished(RunResult::Cancelled) => "cancelled",
            Self::Gone => "exited",
        }
    }
}

/// What one workspace is doing.
#[derive(Debug, Clone)]
pub struct Pane {
    pub name: String,
    pub status: PaneStatus,
    pub pid: Option<u32>,
    pub iteration: Option<(u32, u32)>,
    pub phase: Option<Phase>,
    pub story: Option<String>,
    /// Most recent events, oldest first
    pub events: VecDeque<Event>,
}

impl Pane {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PaneStatus::Waiting,
            pid: None,
            iteration: None,
            phase: None,
            story: None,
            events: VecDeque::new(),
        }
    }

    fn apply(&mut self, event: Event, history: usize) {
        let p = &event.payload;
        if let (Some(i), Some(max)) = (p.iteration, p.max_iterations) {
            self.iteration = Some((i, max));
        }
        if p.phase.is_some() {
            self.phase = p.phase;
            self.story = p.story_id.clone();
        }
        if p.pid.is_some() {
            self.pid = p.pid;
        }

        self.status = match (event.event_type.as_str(), p.result) {
            (event_types::DAEMON_EXITED, Some(result)) => PaneStatus::Finished(result),
            (event_types::DAEMON_EXITED, None) => PaneStatus::Gone,
            _ if matches!(self.status, PaneStatus::Finished(_)) => {
                // A new run started in the same workspace
                if event.event_type == event_types::DAEMON_STARTED {
                    PaneStatus::Running
                } else {
                    self.status
                }
            }
            _ => PaneStatus::Running,
        };

        self.events.push_back(event);
        while self.events.len() > history {
            self.events.pop_front();
        }
    }

    /// Fraction of the iteration budget used.
    pub fn progress(&self) -> f64 {
        match self.iteration {
            Some((i, max)) if max > 0 => (i as f64 / max as f64).min(1.0),
            _ => 0.0,
        }
    }
}

/// All mutable dashboard state.
#[derive(Debug)]
pub struct DashboardState {
    pub panes: Vec<Pane>,
    pub selected: usize,
    /// Events kept per pane
    pub history: usize,
    pub should_quit: bool,
}

impl DashboardState {
    pub fn new(names: Vec<String>, history: usize) -> Self {
        Self {
            panes: names.into_iter().map(Pane::new).collect(),
            selected: 0,
            history: history.max(1),
            should_quit: false,
        }
    }

    pub fn apply(&mut self, update: WorkspaceUpdate) {
        let history = self.history;
        let Some(pane) = self.panes.get_mut(update.index) else {
            return;
        };
        match update.kind {
            UpdateKind::Event(event) => pane.apply(event, history),
            UpdateKind::Exited => {
                if !matches!(pane.status, PaneStatus::Finished(_)) {
                    pane.status = PaneStatus::Gone;
                }
            }
        }
    }

    pub fn selected_pane(&self) -> Option<&Pane> {
        self.panes.get(self.selected)
    }

    pub fn select_next(&mut self) {
        if !self.panes.is_empty() {
            self.selected = (self.selected + 1) % self.panes.len();
        }
    }

    pub fn select_prev(&mut self) {
        if !self.panes.is_empty() {
            self.selected = (self.selected + self.panes.len() - 1) % self.panes.len();
        }
    }

    /// Whether every pane's daemon has stopped.
    pub fn all_stopped(&self) -> bool {
        self.panes
            .iter()
            .all(|p| matches!(p.status, PaneStatus::Finished(_) | PaneStatus::Gone))
    }

    /// Header counts: running, finished, gone.
    pub fn counts(&self) -> (usize, usize, usize) {
        let running = self.panes.iter().filter(|p| p.status == PaneStatus::Running).count();
        let finished = self
            .panes
            .iter()
            .filter(|p| matches!(p.status, PaneStatus::Finished(_)))
            .count();
        let gone = self.panes.iter().filter(|p| p.status == PaneStatus::Gone).count();
        (running, finished, gone)
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => self.should_quit = true,
            KeyCode::Char('j') | KeyCode::Down | KeyCode::Tab => self.select_next(),
            KeyCode::Char('k') | KeyCode::Up | KeyCode::BackTab => self.select_prev(),
            _ => {}
        }
    }
}
