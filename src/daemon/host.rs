//! Runs a loop as the workspace's daemon: owns the PID file, turns signals
//! into cancellation, and records the terminal `RunStatus`.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use super::run_state::{RunState, RunStatus};
use crate::clock::Clock;
use crate::error::Result;
use crate::events::{Event, EventSink, event_types};

/// The work a daemon performs.
#[async_trait]
pub trait LoopRunner: Send + Sync {
    /// Run to completion. `cancel` is observed between iterations.
    async fn run_loop(&self, cancel: CancellationToken) -> Result<()>;
}

pub struct DaemonHost {
    runner: Arc<dyn LoopRunner>,
    run_state: RunState,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl DaemonHost {
    pub fn new(
        runner: Arc<dyn LoopRunner>,
        run_state: RunState,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runner,
            run_state,
            events,
            clock,
        }
    }

    /// Claim the PID file, run the loop, persist how it ended.
    ///
    /// Failing to claim the PID file is fatal and leaves the previous status
    /// untouched. The PID file is released on every path out.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunStatus> {
        let pid = std::process::id();
        let _guard = self.run_state.acquire(pid)?;
        info!("Daemon started (PID {})", pid);
        self.events.emit(
            Event::new(
                event_types::DAEMON_STARTED,
                self.clock.now(),
                format!("Daemon started (PID {})", pid),
            )
            .pid(pid),
        );

        let outcome = self.runner.run_loop(cancel).await;
        let status = RunStatus::classify(&outcome, self.clock.now());
        match &status.error {
            Some(e) => error!("Run failed: {}", e),
            None => info!("Run finished: {}", status.result),
        }

        self.run_state.write_status(&status)?;
        let message = match &status.error {
            Some(e) => format!("Run {}: {}", status.result, e),
            None => format!("Run {}", status.result),
        };
        self.events.emit(
            Event::new(event_types::DAEMON_EXITED, self.clock.now(), message)
                .pid(pid)
                .result(status.result),
        );
        Ok(status)
    }
}

/// Cancel `cancel` on SIGTERM or SIGINT.
#[cfg(unix)]
pub fn install_signal_handlers(cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => info!("SIGTERM received, cancelling after the current iteration"),
            _ = int.recv() => info!("SIGINT received, cancelling after the current iteration"),
        }
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers(cancel: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling after the current iteration");
            cancel.cancel();
        }
    });
    Ok(())
}

/// Leave the controlling terminal's session.
#[cfg(unix)]
pub fn detach() -> Result<()> {
    match nix::unistd::setsid() {
        Ok(_) => Ok(()),
        // Already a group leader, e.g. started by hand
        Err(nix::errno::Errno::EPERM) => Ok(()),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}

#[cfg(not(unix))]
pub fn detach() -> Result<()> {
    Ok(())
}
