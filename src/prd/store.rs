//! Reading, writing, and archiving PRD documents.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::info;

use super::Prd;
use crate::error::{RalphError, Result};
use crate::fsutil::write_json_atomic;

/// Load and validate the PRD at `path`.
pub fn load(path: &Path) -> Result<Prd> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RalphError::PrdNotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let prd: Prd = serde_json::from_str(&content)
        .map_err(|e| RalphError::InvalidPrd(format!("{}: {}", path.display(), e)))?;
    prd.validate()?;
    Ok(prd)
}

/// Atomically replace the PRD at `path`.
pub fn save(path: &Path, prd: &Prd) -> Result<()> {
    prd.validate()?;
    write_json_atomic(path, prd)
}

/// `<date>-<branch>` with path separators flattened.
pub fn archive_dir_name(date: NaiveDate, branch: &str) -> String {
    let branch = branch.trim().trim_start_matches("ralph/");
    let branch = if branch.is_empty() { "unnamed" } else { branch };
    let flat: String = branch
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect();
    format!("{}-{}", date.format("%Y-%m-%d"), flat)
}

/// Copy the PRD (and progress log, if present) into
/// `<archive_root>/<date>-<branch>/` and reset the progress log.
///
/// Returns the archive directory.
pub fn archive(prd_path: &Path, progress_path: &Path, archive_root: &Path, date: NaiveDate) -> Result<PathBuf> {
    let prd = load(prd_path)?;
    let dir = archive_root.join(archive_dir_name(date, &prd.branch_name));
    fs::create_dir_all(&dir)?;

    fs::copy(prd_path, dir.join("prd.json"))?;
    if progress_path.exists() {
        fs::copy(progress_path, dir.join("progress.txt"))?;
        fs::write(progress_path, progress_header(&prd))?;
    }

    info!("Archived PRD '{}' to {}", prd.project, dir.display());
    Ok(dir)
}

/// First lines of a fresh progress log.
pub(crate) fn progress_header(prd: &Prd) -> String {
    format!("# Progress log: {}\n\n", if prd.project.is_empty() { "unnamed" } else { &prd.project })
}
