//! Whole-file writes and advisory locking for shared state files.
//!
//! The registry and PRD are rewritten wholesale. Writes go through a temp file
//! in the same directory followed by a rename, so readers never observe a
//! half-written document. Read-modify-write sequences additionally hold a
//! lock file created with `create_new`.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::daemon::{OsProcess, ProcessLiveness};
use crate::error::{RalphError, Result};

const LOCK_POLL: Duration = Duration::from_millis(25);

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RalphError::Io(e.error))?;
    Ok(())
}

/// Advisory lock held for as long as the value lives.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire the lock at `path`, waiting up to `timeout`.
    ///
    /// A lock whose recorded owner is no longer alive is stolen.
    pub fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + timeout;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(stale) = dead_owner(&path) {
                        warn!("Removing stale lock {} held by {}", path.display(), stale.trim());
                        steal(&path, &stale)?;
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(RalphError::Io(io::Error::new(
                            ErrorKind::WouldBlock,
                            format!("timed out waiting for lock {}", path.display()),
                        )));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Contents of the lock when its recorded owner is gone.
///
/// An empty or unparsable lock is treated as held: the owner may still be
/// between `create_new` and writing its PID.
fn dead_owner(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let pid = content.trim().parse::<u32>().ok()?;
    (!OsProcess.is_alive(pid)).then_some(content)
}

/// Move a stale lock aside and drop it, unless another process replaced it
/// with a live lock between our check and the rename.
fn steal(path: &Path, stale: &str) -> Result<()> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".{}.stale", std::process::id()));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    let moved = fs::read_to_string(&aside).unwrap_or_default();
    if moved != stale {
        debug!("Lock {} changed hands while stealing, restoring it", path.display());
        // Fails only if the path was taken again, in which case that owner wins
        let _ = fs::hard_link(&aside, path);
    }
    fs::remove_file(&aside)?;
    Ok(())
}
