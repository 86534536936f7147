//! Dashboard main loop: drain updates → render → wait for input → repeat.

use eyre::Result;
use log::info;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use super::Tui;
use super::events::{Input, InputHandler};
use super::state::DashboardState;
use super::views::render;
use crate::events::WorkspaceUpdate;

pub struct Dashboard {
    terminal: Tui,
    state: DashboardState,
    input: InputHandler,
    updates: mpsc::Receiver<WorkspaceUpdate>,
    /// Cancelled on quit so readers and monitors stop
    cancel: CancellationToken,
}

impl Dashboard {
    pub fn new(
        terminal: Tui,
        state: DashboardState,
        input: InputHandler,
        updates: mpsc::Receiver<WorkspaceUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            terminal,
            state,
            input,
            updates,
            cancel,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Starting dashboard with {} workspace(s)", self.state.panes.len());

        loop {
            // 1. Apply everything the readers produced since the last frame
            drain(&mut self.updates, &mut self.state);

            // 2. Render
            self.terminal.draw(|f| render(f, &self.state))?;

            // 3. Wait for a key or the next tick
            match self.input.next().await? {
                Input::Key(key) => self.state.handle_key(key),
                Input::Tick | Input::Resize(_, _) => {}
            }

            if self.state.should_quit || self.cancel.is_cancelled() {
                break;
            }
        }

        self.cancel.cancel();
        info!("Dashboard closed");
        Ok(())
    }
}

/// Apply pending updates without waiting; returns how many were applied.
pub fn drain(updates: &mut mpsc::Receiver<WorkspaceUpdate>, state: &mut DashboardState) -> usize {
    let mut applied = 0;
    loop {
        match updates.try_recv() {
            Ok(update) => {
                state.apply(update);
                applied += 1;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return applied,
        }
    }
}
