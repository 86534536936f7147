//! `Vcs` implemented by shelling out to the git CLI.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use super::{RebaseStep, Vcs};
use crate::error::{RalphError, Result};

/// Runs git in a fixed working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    dir: PathBuf,
}

impl GitCli {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run git and return the raw output; only a failure to spawn is an error.
    async fn raw(&self, op: &str, args: &[&str]) -> Result<Output> {
        debug!("git {} (in {})", args.join(" "), self.dir.display());
        Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .env("GIT_EDITOR", "true")
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| RalphError::vcs(op, format!("failed to execute git: {}", e)))
    }

    /// Run git, failing on a non-zero exit; returns trimmed stdout.
    async fn run(&self, op: &str, args: &[&str]) -> Result<String> {
        let output = self.raw(op, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RalphError::vcs(op, stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn ref_exists(&self, op: &str, reference: &str) -> Result<bool> {
        let output = self.raw(op, &["show-ref", "--verify", "--quiet", reference]).await?;
        Ok(output.status.success())
    }

    async fn classify_rebase(&self, op: &str, output: Output) -> Result<RebaseStep> {
        if output.status.success() {
            return Ok(RebaseStep::Clean);
        }
        if self.rebase_in_progress().await? {
            return Ok(RebaseStep::Conflicted);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(RalphError::vcs(op, stderr.trim().to_string()))
    }

    async fn git_path(&self, name: &str) -> Result<PathBuf> {
        let out = self.run("rev-parse", &["rev-parse", "--git-path", name]).await?;
        let path = PathBuf::from(out);
        Ok(if path.is_absolute() { path } else { self.dir.join(path) })
    }
}

fn path_arg<'a>(op: &str, path: &'a Path) -> Result<&'a str> {
    path.to_str()
        .ok_or_else(|| RalphError::vcs(op, format!("non UTF-8 path: {}", path.display())))
}

#[async_trait]
impl Vcs for GitCli {
    async fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        self.ref_exists("branch-exists", &format!("refs/heads/{}", branch)).await
    }

    async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        self.ref_exists("branch-exists", &format!("refs/remotes/{}/{}", remote, branch))
            .await
    }

    async fn has_remote(&self, remote: &str) -> Result<bool> {
        let remotes = self.run("remote", &["remote"]).await?;
        Ok(remotes.lines().any(|r| r.trim() == remote))
    }

    async fn fetch(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run("fetch", &["fetch", remote, refspec]).await.map(|_| ())
    }

    async fn create_worktree(&self, path: &Path, branch: &str, base: Option<&str>) -> Result<()> {
        let path = path_arg("worktree add", path)?;
        match base {
            Some(base) => {
                self.run("worktree add", &["worktree", "add", "-b", branch, path, base])
                    .await?
            }
            None => self.run("worktree add", &["worktree", "add", path, branch]).await?,
        };
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path = path_arg("worktree remove", path)?;
        self.run("worktree remove", &["worktree", "remove", "--force", path])
            .await?;
        Ok(())
    }

    async fn prune_worktrees(&self) -> Result<()> {
        self.run("worktree prune", &["worktree", "prune"]).await.map(|_| ())
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run("branch delete", &["branch", "-D", branch]).await.map(|_| ())
    }

    async fn current_branch(&self) -> Result<String> {
        self.run("current-branch", &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn rebase_start(&self, onto: &str) -> Result<RebaseStep> {
        let output = self.raw("rebase", &["rebase", onto]).await?;
        self.classify_rebase("rebase", output).await
    }

    async fn rebase_continue(&self) -> Result<RebaseStep> {
        let output = self.raw("rebase continue", &["rebase", "--continue"]).await?;
        self.classify_rebase("rebase continue", output).await
    }

    async fn rebase_abort(&self) -> Result<()> {
        self.run("rebase abort", &["rebase", "--abort"]).await.map(|_| ())
    }

    async fn rebase_in_progress(&self) -> Result<bool> {
        for name in ["rebase-merge", "rebase-apply"] {
            if self.git_path(name).await?.exists() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn conflicted_files(&self) -> Result<Vec<String>> {
        let out = self
            .run("conflicted-files", &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        self.run("merge-base", &["merge-base", a, b]).await
    }

    async fn diff(&self, from: &str, to: &str) -> Result<String> {
        self.run("diff", &["diff", from, to]).await
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self
            .raw("is-ancestor", &["merge-base", "--is-ancestor", ancestor, descendant])
            .await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(RalphError::vcs(
                "is-ancestor",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }

    async fn squash_merge(&self, feature: &str, target: &str, message: &str) -> Result<()> {
        self.run("squash-merge", &["checkout", target]).await?;
        self.run("squash-merge", &["merge", "--squash", feature]).await?;
        self.run("squash-merge", &["commit", "-m", message]).await?;
        Ok(())
    }
}
