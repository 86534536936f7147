//! Launching a detached daemon process.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::{Instant, sleep, timeout};

use super::liveness::{OsProcess, ProcessSignals};
use super::run_state::RunState;
use crate::error::{RalphError, Result};

/// Starts a program that is expected to claim `run_state`'s PID file.
#[derive(Debug, Clone)]
pub struct DaemonSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(String, String)>,
    start_timeout: Duration,
    poll: Duration,
    /// Wait after each signal when abandoning a late starter
    kill_grace: Duration,
}

impl DaemonSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            start_timeout: Duration::from_secs(5),
            poll: Duration::from_millis(50),
            kill_grace: Duration::from_secs(2),
        }
    }

    /// Re-execute the running binary with `args`.
    pub fn current_exe(args: Vec<OsString>) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Spawn with null stdio and wait for the PID file to appear.
    ///
    /// The child is reaped by a background task so liveness probes stop
    /// seeing it once it exits. A child that exits cleanly before the PID
    /// file was observed finished its whole run and counts as started. A
    /// child still starting at the deadline is terminated.
    pub async fn spawn(&self, run_state: &RunState) -> Result<u32> {
        if let Some(pid) = run_state.running_pid() {
            return Err(RalphError::AlreadyRunning(pid));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        let mut child = cmd.spawn()?;
        let child_pid = child.id().unwrap_or(0);
        debug!("Spawned daemon process {} ({})", child_pid, self.program.display());

        let (exit_tx, mut exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = exit_tx.send(child.wait().await);
        });

        let deadline = Instant::now() + self.start_timeout;
        loop {
            if let Some(pid) = run_state.read_pid() {
                info!("Daemon running (PID {})", pid);
                return Ok(pid);
            }
            match exit_rx.try_recv() {
                Ok(Ok(status)) if status.success() => return Ok(child_pid),
                Ok(Ok(status)) => return Err(RalphError::DaemonStartFailed(status.to_string())),
                Ok(Err(e)) => return Err(e.into()),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {}
            }
            if Instant::now() >= deadline {
                warn!("Daemon {} did not start within {:?}; terminating it", child_pid, self.start_timeout);
                self.abandon(child_pid, exit_rx, run_state).await;
                return Err(RalphError::DaemonStartTimeout(self.start_timeout));
            }
            sleep(self.poll).await;
        }
    }

    /// Terminate a child that missed the start deadline, reap it, and drop
    /// any PID file it managed to publish.
    async fn abandon(&self, child_pid: u32, mut exit_rx: oneshot::Receiver<std::io::Result<ExitStatus>>, run_state: &RunState) {
        if let Err(e) = OsProcess.terminate(child_pid) {
            debug!("SIGTERM to {} failed: {}", child_pid, e);
        }
        if timeout(self.kill_grace, &mut exit_rx).await.is_err() {
            if let Err(e) = OsProcess.kill(child_pid) {
                debug!("SIGKILL to {} failed: {}", child_pid, e);
            }
            let _ = timeout(self.kill_grace, &mut exit_rx).await;
        }
        if run_state.read_pid() == Some(child_pid) {
            let _ = fs::remove_file(run_state.pid_path());
        }
    }
}
