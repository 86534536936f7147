//! Version-control operations consumed by the workspace manager and the
//! rebase resolver.
//!
//! Nothing here retries; callers decide what a failure means.

mod git;

pub use git::GitCli;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of starting or continuing a rebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseStep {
    /// Every commit applied
    Clean,
    /// Stopped on conflicts; the rebase is still in progress
    Conflicted,
}

/// VCS capability bound to one working directory.
#[async_trait]
pub trait Vcs: Send + Sync {
    async fn local_branch_exists(&self, branch: &str) -> Result<bool>;

    async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool>;

    async fn has_remote(&self, remote: &str) -> Result<bool>;

    async fn fetch(&self, remote: &str, refspec: &str) -> Result<()>;

    /// Add a work tree at `path`. With `base`, `branch` is created from it;
    /// without, the existing `branch` is checked out.
    async fn create_worktree(&self, path: &Path, branch: &str, base: Option<&str>) -> Result<()>;

    async fn remove_worktree(&self, path: &Path) -> Result<()>;

    /// Forget work trees whose directories no longer exist.
    async fn prune_worktrees(&self) -> Result<()>;

    async fn delete_branch(&self, branch: &str) -> Result<()>;

    async fn current_branch(&self) -> Result<String>;

    async fn rebase_start(&self, onto: &str) -> Result<RebaseStep>;

    async fn rebase_continue(&self) -> Result<RebaseStep>;

    async fn rebase_abort(&self) -> Result<()>;

    async fn rebase_in_progress(&self) -> Result<bool>;

    async fn conflicted_files(&self) -> Result<Vec<String>>;

    async fn merge_base(&self, a: &str, b: &str) -> Result<String>;

    async fn diff(&self, from: &str, to: &str) -> Result<String>;

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Check out `target` and squash `feature` onto it as one commit.
    async fn squash_merge(&self, feature: &str, target: &str, message: &str) -> Result<()>;
}
