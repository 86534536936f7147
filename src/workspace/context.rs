//! Resolving which context (base or a named workspace) a command acts on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::registry::Registry;
use crate::daemon::{OsProcess, RunState};
use crate::error::Result;
use crate::paths::{RepoPaths, workspace_of};

/// Environment variable naming the active workspace.
pub const WORKSPACE_ENV: &str = "RALPH_WORKSPACE";

/// Reserved name for the repository's own working directory.
pub const BASE_CONTEXT: &str = "base";

/// Where a command reads its PRD, runs the agent and writes logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkContext {
    /// `None` for the base context
    pub name: Option<String>,
    pub work_dir: PathBuf,
    pub prd_path: PathBuf,
    pub progress_path: PathBuf,
    pub logs_dir: PathBuf,
    pub pid_path: PathBuf,
    pub status_path: PathBuf,
}

impl WorkContext {
    pub fn base(repo: &RepoPaths) -> Self {
        Self {
            name: None,
            work_dir: repo.root().to_path_buf(),
            prd_path: repo.prd(),
            progress_path: repo.progress(),
            logs_dir: repo.logs_dir(),
            pid_path: repo.pid_file(),
            status_path: repo.status_file(),
        }
    }

    pub fn workspace(repo: &RepoPaths, name: &str) -> Self {
        let ws = repo.workspace(name);
        Self {
            name: Some(name.to_string()),
            work_dir: ws.tree(),
            prd_path: ws.prd(),
            progress_path: ws.progress(),
            logs_dir: ws.logs(),
            pid_path: ws.pid_file(),
            status_path: ws.status_file(),
        }
    }

    /// Pick the context: explicit name, then `RALPH_WORKSPACE`, then the
    /// workspace containing `cwd`, then base. Named workspaces must exist.
    pub fn resolve(repo: &RepoPaths, registry: &Registry, explicit: Option<&str>, env: Option<&str>, cwd: &Path) -> Result<Self> {
        let inferred = workspace_of(cwd)
            .filter(|(root, _)| root == repo.root())
            .map(|(_, name)| name);

        let chosen = explicit
            .or(env.filter(|v| !v.is_empty()))
            .map(str::to_string)
            .or(inferred);

        match chosen.as_deref() {
            None | Some(BASE_CONTEXT) => Ok(Self::base(repo)),
            Some(name) => {
                registry.get(name)?;
                Ok(Self::workspace(repo, name))
            }
        }
    }

    /// `resolve` using the process environment and current directory.
    pub fn from_env(repo: &RepoPaths, explicit: Option<&str>) -> Result<Self> {
        let env = std::env::var(WORKSPACE_ENV).ok();
        let cwd = std::env::current_dir()?;
        Self::resolve(repo, &Registry::new(repo.clone()), explicit, env.as_deref(), &cwd)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(BASE_CONTEXT)
    }

    pub fn run_state(&self) -> RunState {
        RunState::new(&self.pid_path, &self.status_path, Arc::new(OsProcess))
    }
}
