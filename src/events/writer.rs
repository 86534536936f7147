//! Append-only JSONL event writer.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use super::{Event, EventSink};
use crate::error::Result;

struct Current {
    iteration: u32,
    file: Option<File>,
}

/// Writes `<dir>/<run_id>-<iteration:04>.jsonl`, starting a new file on
/// every iteration. Names sort in write order within a run.
pub struct EventWriter {
    dir: PathBuf,
    run_id: String,
    current: Mutex<Current>,
}

impl EventWriter {
    pub fn new(dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            run_id: run_id.into(),
            current: Mutex::new(Current {
                iteration: 0,
                file: None,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, iteration: u32) -> PathBuf {
        self.dir.join(format!("{}-{:04}.jsonl", self.run_id, iteration))
    }

    /// Append one event as a single line.
    pub fn write(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_for(current.iteration))?;
            current.file = Some(file);
        }
        if let Some(file) = current.file.as_mut() {
            // One write per line so readers never see an interleaved record
            file.write_all(&line)?;
            file.flush()?;
        }
        Ok(())
    }
}

impl EventSink for EventWriter {
    fn emit(&self, event: Event) {
        if let Err(e) = self.write(&event) {
            warn!("Failed to write event '{}': {}", event.event_type, e);
        }
    }

    fn begin_iteration(&self, iteration: u32) {
        let mut current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.iteration != iteration {
            current.iteration = iteration;
            current.file = None;
        }
    }
}
