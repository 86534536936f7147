//! Seeding a new work tree with untracked files from the repository.

use std::fs;
use std::path::{Component, Path};

use log::{debug, warn};

use crate::error::Result;
use crate::paths::WORKSPACES_DIR;

/// Entries of `.ralph/` that are never copied into a work tree: workspace
/// directories (copying them would recurse into the new tree itself), shared
/// state, logs and per-run files.
const RALPH_EXCLUDES: &[&str] = &[
    WORKSPACES_DIR,
    "state",
    "logs",
    "run.pid",
    "run.status.json",
    "progress.txt",
];

/// Copy `src` into `dest`, recursing into directories.
///
/// Symlinked files are copied as regular files. Symlinked directories are
/// skipped, since following them can loop or leave the repository.
pub fn copy_recursive(src: &Path, dest: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() && src.is_dir() {
        warn!("Not copying symlinked directory {}", src.display());
        return Ok(());
    }
    if meta.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
    }
    Ok(())
}

/// Copy the curated part of a `.ralph/` directory.
pub fn copy_ralph_dir(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if RALPH_EXCLUDES.iter().any(|ex| name == *ex) {
            continue;
        }
        copy_recursive(&entry.path(), &dest.join(&name))?;
    }
    Ok(())
}

/// Copy files matching user glob patterns (relative to `root`) into `tree`,
/// preserving relative paths.
///
/// Problems are not fatal: each one becomes a warning in the returned list.
pub fn copy_patterns(root: &Path, tree: &Path, patterns: &[String]) -> Vec<String> {
    let mut warnings = Vec::new();
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());

    for pattern in patterns {
        if !stays_inside(Path::new(pattern)) {
            warnings.push(format!("copy pattern '{}' must stay inside the repository", pattern));
            continue;
        }
        let full = format!("{}/{}", escaped_root, pattern);
        let entries = match glob::glob(&full) {
            Ok(entries) => entries,
            Err(e) => {
                warnings.push(format!("invalid copy pattern '{}': {}", pattern, e));
                continue;
            }
        };

        let mut matched = false;
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warnings.push(format!("cannot read match for '{}': {}", pattern, e));
                    continue;
                }
            };
            let Ok(rel) = path.strip_prefix(root) else { continue };
            if !stays_inside(rel) {
                continue;
            }
            matched = true;
            let dest = tree.join(rel);
            match copy_recursive(&path, &dest) {
                Ok(()) => debug!("Copied {} into work tree", rel.display()),
                Err(e) => warnings.push(format!("failed to copy {}: {}", rel.display(), e)),
            }
        }
        if !matched {
            warnings.push(format!("copy pattern '{}' matched nothing", pattern));
        }
    }
    warnings
}

/// Relative, with no `..` components.
fn stays_inside(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
