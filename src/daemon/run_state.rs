//! PID and terminal status files for one workspace.
//!
//! `run.pid` holds the daemon's PID as plain decimal text and is the
//! exclusion primitive: it is published with an atomic no-clobber rename, so
//! two starters cannot both own it. `run.status.json` records how the last
//! run ended and survives the daemon.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::liveness::{OsProcess, ProcessLiveness};
use crate::error::{RalphError, Result};
use crate::fsutil::write_json_atomic;
use crate::paths::WorkspacePaths;

/// How a daemon run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    Success,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal record of one daemon execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub result: RunResult,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunStatus {
    /// Classify a loop outcome. Cancellation is its own result, not a failure.
    pub fn classify(outcome: &Result<()>, timestamp: DateTime<Utc>) -> Self {
        let (result, error) = match outcome {
            Ok(()) => (RunResult::Success, None),
            Err(e) if e.is_cancelled() => (RunResult::Cancelled, None),
            Err(e) => (RunResult::Failed, Some(e.to_string())),
        };
        Self {
            result,
            timestamp,
            error,
        }
    }
}

/// Tracks liveness and outcome of the daemon owning one workspace.
#[derive(Clone)]
pub struct RunState {
    pid_path: PathBuf,
    status_path: PathBuf,
    liveness: Arc<dyn ProcessLiveness>,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("pid_path", &self.pid_path)
            .field("status_path", &self.status_path)
            .finish()
    }
}

impl RunState {
    pub fn new(pid_path: impl Into<PathBuf>, status_path: impl Into<PathBuf>, liveness: Arc<dyn ProcessLiveness>) -> Self {
        Self {
            pid_path: pid_path.into(),
            status_path: status_path.into(),
            liveness,
        }
    }

    /// Run state of a workspace directory, probed against the OS.
    pub fn for_workspace(paths: &WorkspacePaths) -> Self {
        Self::new(paths.pid_file(), paths.status_file(), Arc::new(OsProcess))
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    /// PID recorded in the PID file, without judging liveness.
    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.pid_path).ok()?.trim().parse().ok()
    }

    /// PID of the live daemon, if any.
    ///
    /// Not side-effect free: a PID file naming a dead or unparsable process is
    /// deleted. Repeated calls are idempotent.
    pub fn running_pid(&self) -> Option<u32> {
        let content = match fs::read_to_string(&self.pid_path) {
            Ok(content) => content,
            Err(_) => return None,
        };
        match content.trim().parse::<u32>() {
            Ok(pid) if self.liveness.is_alive(pid) => return Some(pid),
            Ok(pid) => info!("Removing stale PID file {} (PID {})", self.pid_path.display(), pid),
            Err(_) => warn!("Removing unreadable PID file {}", self.pid_path.display()),
        }
        if let Err(e) = fs::remove_file(&self.pid_path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!("Failed to remove stale PID file {}: {}", self.pid_path.display(), e);
        }
        None
    }

    /// Whether a live daemon owns this workspace. Self-healing, see `running_pid`.
    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Claim the PID file for `pid`.
    ///
    /// Stale files are reconciled first; publishing is create-exclusive, so a
    /// concurrent starter loses with `AlreadyRunning`.
    pub fn acquire(&self, pid: u32) -> Result<PidGuard> {
        if let Some(owner) = self.running_pid() {
            return Err(RalphError::AlreadyRunning(owner));
        }
        let dir = self.pid_path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        write!(tmp, "{}", pid)?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(&self.pid_path) {
            Ok(_) => {
                debug!("Wrote PID file {} ({})", self.pid_path.display(), pid);
                Ok(PidGuard {
                    path: self.pid_path.clone(),
                })
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                Err(RalphError::AlreadyRunning(self.read_pid().unwrap_or(0)))
            }
            Err(e) => Err(RalphError::Io(e.error)),
        }
    }

    pub fn write_status(&self, status: &RunStatus) -> Result<()> {
        write_json_atomic(&self.status_path, status)
    }

    /// Last recorded outcome, if any run has finished here.
    pub fn read_status(&self) -> Result<Option<RunStatus>> {
        match fs::read_to_string(&self.status_path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Removes the PID file when dropped, whatever the run's outcome.
#[derive(Debug)]
pub struct PidGuard {
    path: PathBuf,
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!("Failed to remove PID file {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Switch(AtomicBool);

    impl ProcessLiveness for Switch {
        fn is_alive(&self, _pid: u32) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn state(dir: &Path, alive: bool) -> RunState {
        RunState::new(
            dir.join("run.pid"),
            dir.join("run.status.json"),
            Arc::new(Switch(AtomicBool::new(alive))),
        )
    }

    #[test]
    fn test_not_running_without_pid_file() {
        let temp = TempDir::new().unwrap();
        assert!(!state(temp.path(), true).is_running());
    }

    #[test]
    fn test_live_pid_is_running() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("run.pid"), "4242\n").unwrap();
        let rs = state(temp.path(), true);
        assert_eq!(rs.running_pid(), Some(4242));
        assert!(temp.path().join("run.pid").exists());
    }

    #[test]
    fn test_stale_pid_file_is_removed() {
        let temp = TempDir::new().unwrap();
        let pid_path = temp.path().join("run.pid");
        fs::write(&pid_path, "4242").unwrap();
        let rs = state(temp.path(), false);

        assert!(!rs.is_running());
        assert!(!pid_path.exists());
        // Idempotent
        assert!(!rs.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_pid_against_os() {
        let temp = TempDir::new().unwrap();
        let pid_path = temp.path().join("run.pid");
        fs::write(&pid_path, "99999999").unwrap();
        let rs = RunState::new(&pid_path, temp.path().join("s.json"), Arc::new(OsProcess));

        assert!(!rs.is_running());
        assert!(!pid_path.exists());
    }

    #[test]
    fn test_garbage_pid_file_is_removed() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("run.pid"), "not a pid").unwrap();
        assert!(!state(temp.path(), true).is_running());
        assert!(!temp.path().join("run.pid").exists());
    }

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let rs = state(temp.path(), true);

        let guard = rs.acquire(777).unwrap();
        assert_eq!(fs::read_to_string(rs.pid_path()).unwrap(), "777");
        assert_eq!(rs.read_pid(), Some(777));

        drop(guard);
        assert!(!rs.pid_path().exists());
    }

    #[test]
    fn test_acquire_refuses_live_owner() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("run.pid"), "555").unwrap();
        let rs = state(temp.path(), true);

        let err = rs.acquire(777).unwrap_err();
        assert!(matches!(err, RalphError::AlreadyRunning(555)));
        assert_eq!(rs.read_pid(), Some(555));
    }

    #[test]
    fn test_acquire_replaces_stale_owner() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("run.pid"), "555").unwrap();
        let rs = state(temp.path(), false);

        let _guard = rs.acquire(777).unwrap();
        assert_eq!(rs.read_pid(), Some(777));
    }

    #[test]
    fn test_status_round_trip_format() {
        let temp = TempDir::new().unwrap();
        let rs = state(temp.path(), true);
        assert!(rs.read_status().unwrap().is_none());

        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let status = RunStatus::classify(&Err(RalphError::MaxIterations(2)), ts);
        rs.write_status(&status).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(rs.status_path()).unwrap()).unwrap();
        assert_eq!(raw["result"], "failed");
        assert_eq!(raw["timestamp"], "2025-01-02T03:04:05Z");
        assert!(raw["error"].as_str().unwrap().contains("maximum iterations"));
        assert_eq!(rs.read_status().unwrap(), Some(status));
    }

    #[test]
    fn test_classify() {
        let ts = Utc::now();
        assert_eq!(RunStatus::classify(&Ok(()), ts).result, RunResult::Success);

        let cancelled = RunStatus::classify(&Err(RalphError::Cancelled), ts);
        assert_eq!(cancelled.result, RunResult::Cancelled);
        assert!(cancelled.error.is_none());

        let failed = RunStatus::classify(&Err(RalphError::Agent("boom".into())), ts);
        assert_eq!(failed.result, RunResult::Failed);
        assert_eq!(failed.error.as_deref(), Some("Agent error: boom"));
    }

    #[test]
    fn test_success_status_omits_error() {
        let json = serde_json::to_string(&RunStatus::classify(&Ok(()), Utc::now())).unwrap();
        assert!(!json.contains("error"));
    }
}
