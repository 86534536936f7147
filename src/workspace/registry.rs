//! Persistent list of workspaces in `.ralph/state/workspaces.json`.
//!
//! The file holds a JSON array and is always rewritten wholesale. Every
//! read-modify-write runs under `workspaces.json.lock`.

use std::fs;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{RalphError, Result};
use crate::fsutil::{LockFile, write_json_atomic};
use crate::paths::RepoPaths;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Names that would collide with the base context or path navigation.
const RESERVED_NAMES: &[&str] = &[".", "..", "base"];

/// A registered workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub name: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

/// Registry entry paired with whether its directory still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceEntry {
    pub workspace: Workspace,
    pub missing: bool,
}

/// Names are restricted to `[A-Za-z0-9._-]+`.
pub fn validate_name(name: &str) -> Result<()> {
    let charset_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !charset_ok || RESERVED_NAMES.contains(&name) {
        return Err(RalphError::InvalidWorkspaceName(name.to_string()));
    }
    Ok(())
}

/// Access to the workspace registry of one repository.
#[derive(Debug, Clone)]
pub struct Registry {
    paths: RepoPaths,
}

impl Registry {
    pub fn new(paths: RepoPaths) -> Self {
        Self { paths }
    }

    fn lock(&self) -> Result<LockFile> {
        LockFile::acquire(self.paths.registry_lock(), LOCK_TIMEOUT)
    }

    /// A missing file is an empty registry.
    fn read(&self) -> Result<Vec<Workspace>> {
        let path = self.paths.registry();
        match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, workspaces: &[Workspace]) -> Result<()> {
        write_json_atomic(&self.paths.registry(), &workspaces)
    }

    /// Add `workspace`. Fails if the name is invalid or already registered.
    pub fn create(&self, workspace: &Workspace) -> Result<()> {
        validate_name(&workspace.name)?;
        let _lock = self.lock()?;

        let mut all = self.read()?;
        if all.iter().any(|w| w.name == workspace.name) {
            return Err(RalphError::WorkspaceExists(workspace.name.clone()));
        }
        all.push(workspace.clone());
        self.write(&all)?;
        debug!("Registered workspace {}", workspace.name);
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Workspace>> {
        self.read()
    }

    /// Look up a registry entry without checking its directory.
    pub fn find(&self, name: &str) -> Result<Option<Workspace>> {
        Ok(self.read()?.into_iter().find(|w| w.name == name))
    }

    /// Look up a workspace that must be usable.
    ///
    /// Unregistered names yield `WorkspaceNotFound`; registered ones whose
    /// directory is gone yield `WorkspaceMissing`.
    pub fn get(&self, name: &str) -> Result<Workspace> {
        let workspace = self
            .find(name)?
            .ok_or_else(|| RalphError::WorkspaceNotFound(name.to_string()))?;
        if !self.paths.workspace(name).dir().is_dir() {
            return Err(RalphError::WorkspaceMissing(name.to_string()));
        }
        Ok(workspace)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let _lock = self.lock()?;

        let mut all = self.read()?;
        let before = all.len();
        all.retain(|w| w.name != name);
        if all.len() == before {
            return Err(RalphError::WorkspaceNotFound(name.to_string()));
        }
        self.write(&all)?;
        debug!("Unregistered workspace {}", name);
        Ok(())
    }

    /// Every entry, flagged when its directory no longer exists.
    pub fn list_with_missing(&self) -> Result<Vec<WorkspaceEntry>> {
        Ok(self
            .read()?
            .into_iter()
            .map(|workspace| {
                let missing = !self.paths.workspace(&workspace.name).dir().is_dir();
                WorkspaceEntry { workspace, missing }
            })
            .collect())
    }
}
