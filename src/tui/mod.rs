//! Live dashboard over one or more workspaces.
//!
//! Each workspace gets its own event reader and liveness monitor
//! (`events::watch_workspaces`); the dashboard only consumes the merged
//! update channel, so a daemon exiting mid-read never blocks the UI.

mod events;
mod runner;
mod state;
mod views;

pub use events::{Input, InputHandler};
pub use runner::{Dashboard, drain};
pub use state::{DashboardState, Pane, PaneStatus};

use crossterm::{
    ExecutableCommand,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use eyre::Result;
use ratatui::prelude::*;
use std::io::{Stdout, stdout};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::TuiConfig;
use crate::events::{StreamTiming, WatchTarget, watch_workspaces};

const MIN_POLL_MS: u64 = 10;
const MAX_POLL_MS: u64 = 200;

/// Type alias for our terminal backend.
pub type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Enable raw mode and switch to the alternate screen.
pub fn init_terminal() -> Result<Tui> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

/// Tail polling follows the tick rate, clamped so a zero or huge setting
/// neither spins nor lags.
fn stream_timing(config: &TuiConfig) -> StreamTiming {
    StreamTiming {
        poll: Duration::from_millis(config.tick_rate_ms.clamp(MIN_POLL_MS, MAX_POLL_MS)),
        ..StreamTiming::default()
    }
}

/// Watch `targets` (name, target) until the user quits.
pub async fn run_dashboard(targets: Vec<(String, WatchTarget)>, config: &TuiConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let (names, targets): (Vec<String>, Vec<WatchTarget>) = targets.into_iter().unzip();
    let updates = watch_workspaces(targets, stream_timing(config), &cancel);

    let terminal = init_terminal()?;
    let mut dashboard = Dashboard::new(
        terminal,
        DashboardState::new(names, config.history),
        InputHandler::new(config.tick_rate_ms),
        updates,
        cancel.clone(),
    );
    let result = dashboard.run().await;
    cancel.cancel();
    restore_terminal()?;
    result
}

/// Status colors inspired by k9s.
pub mod colors {
    use ratatui::style::Color;

    pub const RUNNING: Color = Color::Rgb(0, 255, 127); // Spring green
    pub const PENDING: Color = Color::Rgb(255, 215, 0); // Gold
    pub const COMPLETE: Color = Color::Rgb(50, 205, 50); // Lime green
    pub const FAILED: Color = Color::Rgb(220, 20, 60); // Crimson
    pub const HEADER: Color = Color::Rgb(0, 255, 255); // Cyan
    pub const KEYBIND: Color = Color::Rgb(0, 255, 255); // Cyan
    pub const DIM: Color = Color::DarkGray;
}
