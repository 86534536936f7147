//! WorkspaceManager creates, removes and merges workspaces.
//!
//! A workspace is a directory under `.ralph/workspaces/<name>` holding its
//! own PRD, progress log, logs and a VCS work tree on a dedicated branch.

use std::fs;
use std::sync::Arc;

use log::{debug, info, warn};

use super::copy::{copy_patterns, copy_ralph_dir, copy_recursive};
use super::registry::{Registry, Workspace, validate_name};
use crate::clock::Clock;
use crate::config::WorkspaceConfig;
use crate::daemon::RunState;
use crate::error::{RalphError, Result};
use crate::fsutil::write_json_atomic;
use crate::paths::{RALPH_DIR, RepoPaths, WorkspacePaths};
use crate::vcs::Vcs;

/// Agent configuration directory copied into each work tree when untracked.
const AGENT_DIR: &str = ".claude";

/// Manages workspaces of one repository.
pub struct WorkspaceManager {
    paths: RepoPaths,
    registry: Registry,
    /// VCS bound to the repository root
    vcs: Arc<dyn Vcs>,
    clock: Arc<dyn Clock>,
    remote: String,
    branch_prefix: String,
}

impl WorkspaceManager {
    /// Create a manager for the repository at `paths`.
    ///
    /// # Arguments
    /// * `paths` - Repository layout
    /// * `vcs` - VCS operating in the repository root
    /// * `clock` - Source of `createdAt` timestamps
    pub fn new(paths: RepoPaths, vcs: Arc<dyn Vcs>, clock: Arc<dyn Clock>) -> Self {
        let defaults = WorkspaceConfig::default();
        Self {
            registry: Registry::new(paths.clone()),
            paths,
            vcs,
            clock,
            remote: defaults.remote,
            branch_prefix: defaults.branch_prefix,
        }
    }

    pub fn with_config(mut self, config: &WorkspaceConfig) -> Self {
        self.remote = config.remote.clone();
        self.branch_prefix = config.branch_prefix.clone();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    /// Branch used for `name` when none is given.
    pub fn default_branch(&self, name: &str) -> String {
        format!("{}{}", self.branch_prefix, name)
    }

    /// Create workspace `name` on `branch` (default `<prefix><name>`).
    ///
    /// An existing local or remote branch is resumed; otherwise the branch
    /// is created from the fetched remote `base_branch`, or the local one
    /// when there is no remote. On any failure the workspace directory and
    /// work tree are removed again and nothing is registered.
    pub async fn create(&self, name: &str, branch: Option<&str>, base_branch: &str, patterns: &[String]) -> Result<Workspace> {
        validate_name(name)?;
        if self.registry.find(name)?.is_some() {
            return Err(RalphError::WorkspaceExists(name.to_string()));
        }
        let ws_paths = self.paths.workspace(name);
        if ws_paths.dir().exists() {
            return Err(RalphError::WorkspaceExists(name.to_string()));
        }

        let workspace = Workspace {
            name: name.to_string(),
            branch: branch.map(str::to_string).unwrap_or_else(|| self.default_branch(name)),
            created_at: self.clock.now(),
        };
        let branch_existed = self.vcs.local_branch_exists(&workspace.branch).await?;

        fs::create_dir_all(ws_paths.dir())?;
        match self.populate(&workspace, &ws_paths, base_branch, patterns).await {
            Ok(()) => {
                info!("Created workspace {} on branch {}", workspace.name, workspace.branch);
                Ok(workspace)
            }
            Err(e) => {
                warn!("Creating workspace {} failed, rolling back: {}", name, e);
                self.rollback(&workspace, &ws_paths, branch_existed).await;
                Err(e)
            }
        }
    }

    async fn populate(&self, workspace: &Workspace, ws_paths: &WorkspacePaths, base_branch: &str, patterns: &[String]) -> Result<()> {
        write_json_atomic(&ws_paths.metadata(), workspace)?;
        fs::create_dir_all(ws_paths.logs())?;

        let tree = ws_paths.tree();
        self.checkout(&workspace.branch, &tree, base_branch).await?;

        // Internal state committed to the branch is never trusted
        let stale = tree.join(RALPH_DIR);
        if stale.exists() {
            debug!("Removing checked-out {}", stale.display());
            fs::remove_dir_all(&stale)?;
        }
        copy_ralph_dir(&self.paths.ralph_dir(), &stale)?;

        let agent_dir = self.paths.root().join(AGENT_DIR);
        if agent_dir.is_dir() && !tree.join(AGENT_DIR).exists() {
            copy_recursive(&agent_dir, &tree.join(AGENT_DIR))?;
        }

        for warning in copy_patterns(self.paths.root(), &tree, patterns) {
            warn!("{}", warning);
        }

        let workspace = workspace.clone();
        self.locked(move |registry| registry.create(&workspace)).await
    }

    /// Registry writes wait on a lock file; keep that off the async workers.
    async fn locked<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Registry) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || op(&registry))
            .await
            .map_err(|e| RalphError::Io(std::io::Error::other(e)))?
    }

    async fn checkout(&self, branch: &str, tree: &std::path::Path, base_branch: &str) -> Result<()> {
        if self.vcs.local_branch_exists(branch).await? {
            info!("Resuming local branch {}", branch);
            return self.vcs.create_worktree(tree, branch, None).await;
        }

        let has_remote = self.vcs.has_remote(&self.remote).await?;
        if has_remote && self.vcs.remote_branch_exists(&self.remote, branch).await? {
            info!("Resuming remote branch {}/{}", self.remote, branch);
            let start = format!("{}/{}", self.remote, branch);
            return self.vcs.create_worktree(tree, branch, Some(&start)).await;
        }

        let base = if has_remote {
            match self.vcs.fetch(&self.remote, base_branch).await {
                Ok(()) => format!("{}/{}", self.remote, base_branch),
                Err(e) => {
                    warn!("Fetching {} from {} failed, using local branch: {}", base_branch, self.remote, e);
                    base_branch.to_string()
                }
            }
        } else {
            base_branch.to_string()
        };
        info!("Creating branch {} from {}", branch, base);
        self.vcs.create_worktree(tree, branch, Some(&base)).await
    }

    /// Best-effort undo of a partial `create`.
    async fn rollback(&self, workspace: &Workspace, ws_paths: &WorkspacePaths, branch_existed: bool) {
        let tree = ws_paths.tree();
        if tree.exists()
            && let Err(e) = self.vcs.remove_worktree(&tree).await
        {
            debug!("Rollback: removing work tree failed: {}", e);
        }
        if let Err(e) = fs::remove_dir_all(ws_paths.dir()) {
            warn!("Rollback: could not remove {}: {}", ws_paths.dir().display(), e);
        }
        let _ = self.vcs.prune_worktrees().await;
        if !branch_existed && let Ok(true) = self.vcs.local_branch_exists(&workspace.branch).await {
            let _ = self.vcs.delete_branch(&workspace.branch).await;
        }
    }

    /// Remove workspace `name`.
    ///
    /// Tolerates a directory that is already gone. VCS cleanup is best
    /// effort; the registry entry is always removed.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let workspace = self
            .registry
            .find(name)?
            .ok_or_else(|| RalphError::WorkspaceNotFound(name.to_string()))?;
        let ws_paths = self.paths.workspace(name);

        if let Some(pid) = RunState::for_workspace(&ws_paths).running_pid() {
            return Err(RalphError::AlreadyRunning(pid));
        }

        let tree = ws_paths.tree();
        if tree.exists()
            && let Err(e) = self.vcs.remove_worktree(&tree).await
        {
            warn!("Could not remove work tree {}: {}", tree.display(), e);
        }
        if ws_paths.dir().exists() {
            fs::remove_dir_all(ws_paths.dir())?;
        }
        if let Err(e) = self.vcs.prune_worktrees().await {
            debug!("worktree prune failed: {}", e);
        }

        let owned = name.to_string();
        self.locked(move |registry| registry.remove(&owned)).await?;

        if let Err(e) = self.vcs.delete_branch(&workspace.branch).await {
            warn!("Could not delete branch {}: {}", workspace.branch, e);
        }
        info!("Removed workspace {}", name);
        Ok(())
    }

    /// Squash-merge the workspace branch into `base_branch`.
    ///
    /// The branch must already contain `base_branch`; otherwise the caller
    /// has to rebase first.
    pub async fn merge(&self, name: &str, base_branch: &str) -> Result<Workspace> {
        let workspace = self.registry.get(name)?;
        if !self.vcs.is_ancestor(base_branch, &workspace.branch).await? {
            return Err(RalphError::vcs(
                "merge",
                format!("{} is not based on the tip of {}", workspace.branch, base_branch),
            ));
        }

        let message = format!("Merge workspace {} ({})", workspace.name, workspace.branch);
        self.vcs.squash_merge(&workspace.branch, base_branch, &message).await?;
        info!("Merged {} into {}", workspace.branch, base_branch);
        Ok(workspace)
    }
}
