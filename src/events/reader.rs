//! Event log consumers: the offset-tracking cursor, the polling tailer used by
//! plain-text attach, and the continuous reader plus liveness monitor used by
//! the dashboard.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::Event;
use crate::daemon::RunState;
use crate::error::{RalphError, Result};

const CHANNEL_CAPACITY: usize = 256;

/// Polling intervals shared by the readers.
#[derive(Debug, Clone)]
pub struct StreamTiming {
    /// How often log files are scanned
    pub poll: Duration,
    /// How often the monitor probes the daemon
    pub liveness: Duration,
    /// Extra wait after the daemon dies before the reader is stopped
    pub grace: Duration,
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(200),
            liveness: Duration::from_millis(500),
            grace: Duration::from_millis(300),
        }
    }
}

/// Tracks how far each `*.jsonl` file in a directory has been read.
#[derive(Debug)]
pub struct EventCursor {
    dir: PathBuf,
    offsets: HashMap<PathBuf, u64>,
}

impl EventCursor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            offsets: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every complete line appended since the last poll.
    ///
    /// Files are visited in name order; a trailing partial line is left for
    /// the next poll. Malformed lines are skipped.
    pub fn poll(&mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for path in log_files(&self.dir)? {
            self.read_new(&path, &mut events)?;
        }
        Ok(events)
    }

    fn read_new(&mut self, path: &Path, out: &mut Vec<Event>) -> Result<()> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut offset = self.offsets.get(path).copied().unwrap_or(0);
        if file.metadata()?.len() < offset {
            // Truncated or replaced
            offset = 0;
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
            self.offsets.insert(path.to_path_buf(), offset);
            return Ok(());
        };
        for line in buf[..end].split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Event>(line) {
                Ok(event) => out.push(event),
                Err(e) => debug!("Skipping malformed event in {}: {}", path.display(), e),
            }
        }
        self.offsets.insert(path.to_path_buf(), offset + end as u64 + 1);
        Ok(())
    }
}

fn log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.jsonl", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| RalphError::Config(format!("invalid log pattern {}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Delete every event log in `dir`, so the next run's logs stand alone.
pub fn prune_logs(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for path in log_files(dir)? {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    if removed > 0 {
        debug!("Pruned {} event log(s) from {}", removed, dir.display());
    }
    Ok(removed)
}

/// Why `tail` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailEnd {
    DaemonExited,
    Interrupted,
}

/// Follow the logs until the daemon exits or `interrupt` fires.
///
/// After the daemon is seen dead the logs are drained once more so a final
/// burst of events is not lost.
pub async fn tail<F>(
    cursor: &mut EventCursor,
    run_state: &RunState,
    interval: Duration,
    interrupt: &CancellationToken,
    mut on_event: F,
) -> Result<TailEnd>
where
    F: FnMut(&Event),
{
    loop {
        for event in cursor.poll()? {
            on_event(&event);
        }
        if !run_state.is_running() {
            for event in cursor.poll()? {
                on_event(&event);
            }
            return Ok(TailEnd::DaemonExited);
        }
        tokio::select! {
            _ = interrupt.cancelled() => return Ok(TailEnd::Interrupted),
            _ = sleep(interval) => {}
        }
    }
}

/// Token cancelled on the first Ctrl-C.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            trigger.cancel();
        }
    });
    token
}

/// Stream events into a channel until `cancel` fires, then drain once more.
pub fn spawn_reader(mut cursor: EventCursor, interval: Duration, cancel: CancellationToken) -> (mpsc::Receiver<Event>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        loop {
            if !forward(&mut cursor, &tx).await {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    forward(&mut cursor, &tx).await;
                    return;
                }
                _ = sleep(interval) => {}
            }
        }
    });
    (rx, handle)
}

/// Send new events; false once the receiver is gone.
async fn forward(cursor: &mut EventCursor, tx: &mpsc::Sender<Event>) -> bool {
    let events = match cursor.poll() {
        Ok(events) => events,
        Err(e) => {
            warn!("Failed to read events from {}: {}", cursor.dir().display(), e);
            return true;
        }
    };
    for event in events {
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

/// Cancel `cancel` once the daemon is gone, after a grace period that lets
/// the reader pick up events written just before exit.
pub fn spawn_monitor(run_state: RunState, timing: StreamTiming, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if !run_state.is_running() {
                sleep(timing.grace).await;
                cancel.cancel();
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(timing.liveness) => {}
            }
        }
    })
}

/// One workspace to follow in the multi-workspace dashboard.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub logs_dir: PathBuf,
    pub run_state: RunState,
}

#[derive(Debug, Clone)]
pub enum UpdateKind {
    Event(Event),
    /// The workspace's reader has stopped
    Exited,
}

/// Update tagged with the index of its `WatchTarget`.
#[derive(Debug, Clone)]
pub struct WorkspaceUpdate {
    pub index: usize,
    pub kind: UpdateKind,
}

/// One reader and one liveness monitor per target, merged into a single
/// indexed channel.
pub fn watch_workspaces(
    targets: Vec<WatchTarget>,
    timing: StreamTiming,
    cancel: &CancellationToken,
) -> mpsc::Receiver<WorkspaceUpdate> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    for (index, target) in targets.into_iter().enumerate() {
        let token = cancel.child_token();
        let (mut events, _reader) = spawn_reader(EventCursor::new(target.logs_dir), timing.poll, token.clone());
        spawn_monitor(target.run_state, timing.clone(), token);

        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let update = WorkspaceUpdate {
                    index,
                    kind: UpdateKind::Event(event),
                };
                if tx.send(update).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(WorkspaceUpdate {
                    index,
                    kind: UpdateKind::Exited,
                })
                .await;
        });
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::ProcessLiveness;
    use crate::events::{EventSink, EventWriter, event_types};
    use chrono::Utc;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct Switch(AtomicBool);

    impl ProcessLiveness for Switch {
        fn is_alive(&self, _pid: u32) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn line(message: &str) -> String {
        let event = Event::new(event_types::PHASE_ENTERED, Utc::now(), message);
        format!("{}\n", serde_json::to_string(&event).unwrap())
    }

    fn live_state(dir: &Path, alive: bool) -> (RunState, Arc<Switch>) {
        let switch = Arc::new(Switch(AtomicBool::new(alive)));
        fs::write(dir.join("run.pid"), "1").unwrap();
        let state = RunState::new(dir.join("run.pid"), dir.join("run.status.json"), switch.clone());
        (state, switch)
    }

    fn fast() -> StreamTiming {
        StreamTiming {
            poll: Duration::from_millis(10),
            liveness: Duration::from_millis(20),
            grace: Duration::from_millis(30),
        }
    }

    fn messages(events: &[Event]) -> Vec<String> {
        events.iter().map(|e| e.payload.message.clone()).collect()
    }

    #[test]
    fn test_cursor_reads_only_complete_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run-0000.jsonl");
        let full = line("one");
        let second = line("two");
        let (head, rest) = second.split_at(10);
        fs::write(&path, format!("{}{}", full, head)).unwrap();

        let mut cursor = EventCursor::new(temp.path());
        assert_eq!(messages(&cursor.poll().unwrap()), vec!["one"]);

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(rest.as_bytes()).unwrap();
        assert_eq!(messages(&cursor.poll().unwrap()), vec!["two"]);
        assert!(cursor.poll().unwrap().is_empty());
    }

    #[test]
    fn test_cursor_visits_files_in_name_order() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("run-0002.jsonl"), line("later")).unwrap();
        fs::write(temp.path().join("run-0001.jsonl"), line("earlier")).unwrap();
        fs::write(temp.path().join("daemon.log"), "not events\n").unwrap();

        let mut cursor = EventCursor::new(temp.path());
        assert_eq!(messages(&cursor.poll().unwrap()), vec!["earlier", "later"]);
    }

    #[test]
    fn test_cursor_skips_malformed_lines() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("a.jsonl"),
            format!("{}not json\n\n{}", line("a"), line("b")),
        )
        .unwrap();

        let mut cursor = EventCursor::new(temp.path());
        assert_eq!(messages(&cursor.poll().unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_cursor_missing_dir_is_empty() {
        let mut cursor = EventCursor::new("/nonexistent/ralph/logs");
        assert!(cursor.poll().unwrap().is_empty());
    }

    #[test]
    fn test_prune_logs_keeps_other_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("old-0000.jsonl"), line("x")).unwrap();
        fs::write(temp.path().join("old-0001.jsonl"), line("y")).unwrap();
        fs::write(temp.path().join("daemon.log"), "keep").unwrap();

        assert_eq!(prune_logs(temp.path()).unwrap(), 2);
        assert!(temp.path().join("daemon.log").exists());
        assert!(EventCursor::new(temp.path()).poll().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tail_drains_after_exit() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("r-0000.jsonl"), format!("{}{}", line("a"), line("b"))).unwrap();
        let (state, _switch) = live_state(temp.path(), false);

        let mut seen = Vec::new();
        let mut cursor = EventCursor::new(temp.path());
        let end = tail(&mut cursor, &state, Duration::from_millis(10), &CancellationToken::new(), |e| {
            seen.push(e.payload.message.clone())
        })
        .await
        .unwrap();

        assert_eq!(end, TailEnd::DaemonExited);
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_tail_follows_until_exit() {
        let temp = TempDir::new().unwrap();
        let (state, switch) = live_state(temp.path(), true);
        let writer = EventWriter::new(temp.path(), "r").unwrap();

        let producer = tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            writer.emit(Event::new(event_types::ITERATION_STARTED, Utc::now(), "first"));
            sleep(Duration::from_millis(30)).await;
            writer.emit(Event::new(event_types::DAEMON_EXITED, Utc::now(), "last"));
            switch.0.store(false, Ordering::SeqCst);
        });

        let mut seen = Vec::new();
        let mut cursor = EventCursor::new(temp.path());
        let end = tail(&mut cursor, &state, Duration::from_millis(10), &CancellationToken::new(), |e| {
            seen.push(e.payload.message.clone())
        })
        .await
        .unwrap();
        producer.await.unwrap();

        assert_eq!(end, TailEnd::DaemonExited);
        assert_eq!(seen, vec!["first", "last"]);
    }

    #[tokio::test]
    async fn test_tail_interrupted() {
        let temp = TempDir::new().unwrap();
        let (state, _switch) = live_state(temp.path(), true);
        let interrupt = CancellationToken::new();
        interrupt.cancel();

        let mut cursor = EventCursor::new(temp.path());
        let end = tail(&mut cursor, &state, Duration::from_millis(10), &interrupt, |_| {})
            .await
            .unwrap();
        assert_eq!(end, TailEnd::Interrupted);
        assert!(state.pid_path().exists());
    }

    #[tokio::test]
    async fn test_reader_and_monitor_lose_nothing_at_exit() {
        let temp = TempDir::new().unwrap();
        let (state, switch) = live_state(temp.path(), true);
        let writer = EventWriter::new(temp.path(), "r").unwrap();
        let cancel = CancellationToken::new();

        let (mut rx, reader) = spawn_reader(EventCursor::new(temp.path()), fast().poll, cancel.clone());
        let monitor = spawn_monitor(state, fast(), cancel.clone());

        for i in 0..5 {
            writer.emit(Event::new(event_types::ITERATION_STARTED, Utc::now(), format!("e{}", i)));
        }
        // Last event lands just before the daemon is observed dead
        writer.emit(Event::new(event_types::DAEMON_EXITED, Utc::now(), "bye"));
        switch.0.store(false, Ordering::SeqCst);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event.payload.message);
        }
        monitor.await.unwrap();
        reader.await.unwrap();

        assert_eq!(received, vec!["e0", "e1", "e2", "e3", "e4", "bye"]);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_reader_stops_on_cancel() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("r-0000.jsonl"), line("only")).unwrap();
        let cancel = CancellationToken::new();

        let (mut rx, reader) = spawn_reader(EventCursor::new(temp.path()), Duration::from_millis(10), cancel.clone());
        assert_eq!(rx.recv().await.unwrap().payload.message, "only");
        cancel.cancel();
        reader.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_workspaces_tags_updates() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(first.path().join("r-0000.jsonl"), line("from-first")).unwrap();
        fs::write(second.path().join("r-0000.jsonl"), line("from-second")).unwrap();
        let (state_a, _a) = live_state(first.path(), false);
        let (state_b, _b) = live_state(second.path(), false);

        let targets = vec![
            WatchTarget {
                logs_dir: first.path().to_path_buf(),
                run_state: state_a,
            },
            WatchTarget {
                logs_dir: second.path().to_path_buf(),
                run_state: state_b,
            },
        ];
        let mut rx = watch_workspaces(targets, fast(), &CancellationToken::new());

        let mut events = HashMap::new();
        let mut exited = Vec::new();
        while let Some(update) = rx.recv().await {
            match update.kind {
                UpdateKind::Event(e) => {
                    events.insert(update.index, e.payload.message);
                }
                UpdateKind::Exited => exited.push(update.index),
            }
        }
        exited.sort();

        assert_eq!(events[&0], "from-first");
        assert_eq!(events[&1], "from-second");
        assert_eq!(exited, vec![0, 1]);
    }
}
