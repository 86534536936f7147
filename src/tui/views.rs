//! Dashboard rendering.
//!
//! ```text
//! ┌ ralph ─ 2 running │ 1 finished ───────────────────┐
//! ├ Workspaces ─┬ feat ──────────────────────────────┤
//! │ ● feat      │ story S-3  [████░░░░] 4/10         │
//! │ ○ fix-login │ 12:00:01 [4/10] story: Building S-3 │
//! └─────────────┴────────────────────────────────────┘
//! ```

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
};

use super::colors;
use super::state::{DashboardState, Pane, PaneStatus};
use crate::daemon::RunResult;

pub fn render(frame: &mut Frame, state: &DashboardState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    render_header(frame, rows[0], state);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(rows[1]);
    render_workspaces(frame, cols[0], state);
    match state.selected_pane() {
        Some(pane) => render_detail(frame, cols[1], pane),
        None => {
            let empty = Paragraph::new("No workspaces to watch")
                .style(Style::default().fg(colors::DIM))
                .block(Block::default().borders(Borders::ALL));
            frame.render_widget(empty, cols[1]);
        }
    }

    let footer = Line::from(vec![
        Span::styled("j/k", Style::default().fg(colors::KEYBIND)),
        Span::raw(" select  "),
        Span::styled("q", Style::default().fg(colors::KEYBIND)),
        Span::raw(" quit"),
    ]);
    frame.render_widget(Paragraph::new(footer), rows[2]);
}

fn render_header(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let (running, finished, gone) = state.counts();
    let line = Line::from(vec![
        Span::styled(" ralph ", Style::default().fg(colors::HEADER).add_modifier(Modifier::BOLD)),
        Span::raw(format!("{} running │ {} finished │ {} exited", running, finished, gone)),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

pub fn status_color(status: PaneStatus) -> ratatui::style::Color {
    match status {
        PaneStatus::Waiting => colors::PENDING,
        PaneStatus::Running => colors::RUNNING,
        PaneStatus::Finished(RunResult::Success) => colors::COMPLETE,
        PaneStatus::Finished(RunResult::Failed) => colors::FAILED,
        PaneStatus::Finished(RunResult::Cancelled) | PaneStatus::Gone => colors::DIM,
    }
}

fn status_glyph(status: PaneStatus) -> &'static str {
    match status {
        PaneStatus::Running => "●",
        PaneStatus::Finished(RunResult::Success) => "✓",
        PaneStatus::Finished(RunResult::Failed) => "✗",
        _ => "○",
    }
}

fn render_workspaces(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let items: Vec<ListItem> = state
        .panes
        .iter()
        .enumerate()
        .map(|(i, pane)| {
            let style = if i == state.selected {
                Style::default().bg(colors::DIM).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let line = Line::from(vec![
                Span::styled(
                    format!("{} ", status_glyph(pane.status)),
                    Style::default().fg(status_color(pane.status)),
                ),
                Span::raw(pane.name.clone()),
            ]);
            ListItem::new(line).style(style)
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Workspaces ({}) ", state.panes.len())),
    );
    frame.render_widget(list, area);
}

fn render_detail(frame: &mut Frame, area: Rect, pane: &Pane) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3)])
        .split(area);

    let mut label = pane.status.label().to_string();
    if let Some(phase) = pane.phase {
        label.push_str(&format!(" │ {}", phase));
    }
    if let Some(story) = &pane.story {
        label.push_str(&format!(" {}", story));
    }
    if let Some((i, max)) = pane.iteration {
        label.push_str(&format!(" │ {}/{}", i, max));
    }
    let title = match pane.pid {
        Some(pid) => format!(" {} (pid {}) ", pane.name, pid),
        None => format!(" {} ", pane.name),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .gauge_style(Style::default().fg(status_color(pane.status)))
        .ratio(pane.progress())
        .label(label);
    frame.render_widget(gauge, rows[0]);

    // Newest events at the bottom, trimmed to what fits
    let height = rows[1].height.saturating_sub(2) as usize;
    let skip = pane.events.len().saturating_sub(height);
    let items: Vec<ListItem> = pane
        .events
        .iter()
        .skip(skip)
        .map(|e| ListItem::new(e.summary()))
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" Events "));
    frame.render_widget(list, rows[1]);
}
