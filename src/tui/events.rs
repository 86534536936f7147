//! Terminal input for the dashboard.

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use eyre::Result;
use std::time::Duration;

/// Input seen by the dashboard loop.
#[derive(Debug, Clone)]
pub enum Input {
    Key(KeyEvent),
    /// Poll timeout elapsed; time to pick up new workspace updates
    Tick,
    Resize(u16, u16),
}

/// Polls crossterm on a blocking thread, producing a `Tick` when nothing
/// arrives within the tick rate.
pub struct InputHandler {
    tick_rate: Duration,
}

impl InputHandler {
    pub fn new(tick_rate_ms: u64) -> Self {
        Self {
            tick_rate: Duration::from_millis(tick_rate_ms.max(10)),
        }
    }

    pub async fn next(&self) -> Result<Input> {
        let tick_rate = self.tick_rate;
        let input = tokio::task::spawn_blocking(move || -> Result<Input> {
            if !event::poll(tick_rate)? {
                return Ok(Input::Tick);
            }
            Ok(match event::read()? {
                // Releases and repeats are ignored
                CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Input::Key(key),
                CrosstermEvent::Resize(w, h) => Input::Resize(w, h),
                _ => Input::Tick,
            })
        })
        .await??;
        Ok(input)
    }
}

impl Default for InputHandler {
    fn default() -> Self {
        Self::new(250)
    }
}
