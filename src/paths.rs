//! On-disk layout of Ralph state.
//!
//! ```text
//! <repo>/.ralph/
//!   config.yml
//!   progress.txt
//!   logs/
//!   state/{prd.json, workspaces.json, archive/<date>-<branch>/prd.json}
//!   workspaces/<name>/{workspace.json, prd.json, progress.txt, tree/, logs/, run.pid, run.status.json}
//! ```

use std::path::{Path, PathBuf};

pub const RALPH_DIR: &str = ".ralph";
pub const WORKSPACES_DIR: &str = "workspaces";
pub const TREE_DIR: &str = "tree";

/// Paths rooted at a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPaths {
    root: PathBuf,
}

impl RepoPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Find the repository that contains `start`.
    ///
    /// A path inside a workspace resolves to the repository owning that
    /// workspace, not to the workspace's own work tree.
    pub fn discover(start: &Path) -> Option<Self> {
        if let Some((root, _)) = workspace_of(start) {
            return Some(Self::new(root));
        }
        start
            .ancestors()
            .find(|dir| dir.join(RALPH_DIR).is_dir())
            .or_else(|| start.ancestors().find(|dir| dir.join(".git").exists()))
            .map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ralph_dir(&self) -> PathBuf {
        self.root.join(RALPH_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.ralph_dir().join("config.yml")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.ralph_dir().join("state")
    }

    /// PRD of the base context.
    pub fn prd(&self) -> PathBuf {
        self.state_dir().join("prd.json")
    }

    pub fn registry(&self) -> PathBuf {
        self.state_dir().join("workspaces.json")
    }

    pub fn registry_lock(&self) -> PathBuf {
        self.state_dir().join("workspaces.json.lock")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.state_dir().join("archive")
    }

    /// Progress log of the base context.
    pub fn progress(&self) -> PathBuf {
        self.ralph_dir().join("progress.txt")
    }

    /// Shared log directory for the base context.
    pub fn logs_dir(&self) -> PathBuf {
        self.ralph_dir().join("logs")
    }

    /// PID file of a daemon running in the base context.
    pub fn pid_file(&self) -> PathBuf {
        self.ralph_dir().join("run.pid")
    }

    pub fn status_file(&self) -> PathBuf {
        self.ralph_dir().join("run.status.json")
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.ralph_dir().join(WORKSPACES_DIR)
    }

    pub fn workspace(&self, name: &str) -> WorkspacePaths {
        WorkspacePaths::new(self.workspaces_dir().join(name))
    }
}

/// Paths inside one workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata(&self) -> PathBuf {
        self.dir.join("workspace.json")
    }

    pub fn prd(&self) -> PathBuf {
        self.dir.join("prd.json")
    }

    pub fn progress(&self) -> PathBuf {
        self.dir.join("progress.txt")
    }

    pub fn tree(&self) -> PathBuf {
        self.dir.join(TREE_DIR)
    }

    pub fn logs(&self) -> PathBuf {
        self.dir.join("logs")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.join("run.pid")
    }

    pub fn status_file(&self) -> PathBuf {
        self.dir.join("run.status.json")
    }
}

/// If `path` lies inside `<root>/.ralph/workspaces/<name>`, return
/// `(root, name)`.
pub fn workspace_of(path: &Path) -> Option<(PathBuf, String)> {
    for dir in path.ancestors() {
        let Some(parent) = dir.parent() else { continue };
        let Some(grandparent) = parent.parent() else { continue };
        if parent.file_name().is_some_and(|n| n == WORKSPACES_DIR)
            && grandparent.file_name().is_some_and(|n| n == RALPH_DIR)
            && let (Some(root), Some(name)) = (grandparent.parent(), dir.file_name())
        {
            return Some((root.to_path_buf(), name.to_string_lossy().to_string()));
        }
    }
    None
}
