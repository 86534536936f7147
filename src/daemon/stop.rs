//! Two-phase shutdown: graceful termination, then a forceful kill.

use std::time::Duration;

use log::{info, warn};
use tokio::time::{Instant, sleep};

use super::liveness::ProcessSignals;
use super::run_state::RunState;
use crate::config::DaemonConfig;
use crate::error::{RalphError, Result};

/// Timing for `stop_and_wait`.
#[derive(Debug, Clone)]
pub struct StopPolicy {
    pub poll: Duration,
    pub graceful_timeout: Duration,
    pub kill_timeout: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(200),
            graceful_timeout: Duration::from_secs(30),
            kill_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DaemonConfig> for StopPolicy {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            poll: Duration::from_millis(config.stop_poll_ms),
            graceful_timeout: Duration::from_secs(config.stop_timeout_secs),
            kill_timeout: Duration::from_secs(config.kill_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No live daemon to stop
    NotRunning,
    /// Exited after SIGTERM
    Terminated(u32),
    /// Needed SIGKILL
    Killed(u32),
}

/// Stop the daemon recorded in `run_state` and wait for it to exit.
pub async fn stop_and_wait(run_state: &RunState, signals: &dyn ProcessSignals, policy: &StopPolicy) -> Result<StopOutcome> {
    let Some(pid) = run_state.running_pid() else {
        return Ok(StopOutcome::NotRunning);
    };

    info!("Sending SIGTERM to daemon (PID {})", pid);
    signals.terminate(pid)?;
    if wait_for_exit(signals, pid, policy.graceful_timeout, policy.poll).await {
        run_state.running_pid();
        return Ok(StopOutcome::Terminated(pid));
    }

    // Escalate only if it is still alive right now
    if !signals.is_alive(pid) {
        run_state.running_pid();
        return Ok(StopOutcome::Terminated(pid));
    }
    warn!(
        "Daemon (PID {}) still alive after {:?}, sending SIGKILL",
        pid, policy.graceful_timeout
    );
    signals.kill(pid)?;
    if wait_for_exit(signals, pid, policy.kill_timeout, policy.poll).await {
        // A killed daemon never ran its PID guard
        run_state.running_pid();
        return Ok(StopOutcome::Killed(pid));
    }

    Err(RalphError::DaemonStopTimeout(pid))
}

/// Poll until `pid` is gone or `timeout` elapses. True when it exited.
async fn wait_for_exit(signals: &dyn ProcessSignals, pid: u32, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !signals.is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(poll).await;
    }
}
