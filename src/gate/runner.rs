use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use log::{debug, info};
use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::config::GateConfig;
use crate::error::{RalphError, Result};
use crate::paths::{RepoPaths, workspace_of};

/// Exit code reported when the command could not be started
const EXIT_SPAWN_FAILED: i32 = 127;
/// Exit code reported when the command exceeded its timeout
const EXIT_TIMED_OUT: i32 = 124;
const MAX_NAME_LEN: usize = 60;

/// Outcome of one gate run.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub command: String,
    pub passed: bool,
    pub exit_code: i32,
    pub duration: Duration,
    /// Last lines of output; empty on success
    pub tail: Vec<String>,
    pub log_path: PathBuf,
}

impl GateReport {
    /// Human summary: one status line, plus tail and log pointer on failure.
    pub fn summary(&self) -> String {
        let secs = self.duration.as_secs_f64();
        if self.passed {
            return format!("PASS: {} ({:.2}s)", self.command, secs);
        }
        let mut out = format!("FAIL: {} (exit {}, {:.2}s)\n", self.command, self.exit_code, secs);
        if !self.tail.is_empty() {
            out.push_str(&format!("--- last {} lines ---\n", self.tail.len()));
            for line in &self.tail {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str("---\n");
        }
        out.push_str(&format!("Full log: {}", self.log_path.display()));
        out
    }
}

/// Executes gate commands.
#[derive(Debug, Clone)]
pub struct GateRunner {
    tail_lines: usize,
    timeout: Option<Duration>,
}

impl Default for GateRunner {
    fn default() -> Self {
        Self::from(&GateConfig::default())
    }
}

impl From<&GateConfig> for GateRunner {
    fn from(config: &GateConfig) -> Self {
        Self {
            tail_lines: config.tail_lines,
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl GateRunner {
    pub fn new(tail_lines: usize) -> Self {
        Self {
            tail_lines,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `argv` in `work_dir`, logging into `logs_dir`.
    pub async fn run(&self, argv: &[String], work_dir: &Path, logs_dir: &Path) -> Result<GateReport> {
        let Some((program, args)) = argv.split_first() else {
            return Err(RalphError::Config("no quality gate command given".to_string()));
        };
        let command = argv.join(" ");

        fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join(log_file_name(&command));
        let mut log = File::create(&log_path)?;
        writeln!(log, "$ {}", command)?;
        log.flush()?;

        info!("Running quality gate: {}", command);
        let started = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?))
            .kill_on_drop(true);

        let exit_code = match cmd.spawn() {
            Ok(mut child) => {
                let waited = match self.timeout {
                    Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
                    None => Some(child.wait().await),
                };
                match waited {
                    Some(status) => status?.code().unwrap_or(1),
                    None => {
                        let _ = child.kill().await;
                        writeln!(log, "ralph: timed out after {:?}", self.timeout.unwrap_or_default())?;
                        EXIT_TIMED_OUT
                    }
                }
            }
            Err(e) => {
                writeln!(log, "ralph: failed to start '{}': {}", program, e)?;
                EXIT_SPAWN_FAILED
            }
        };
        let duration = started.elapsed();
        drop(log);

        let passed = exit_code == 0;
        let tail = if passed {
            Vec::new()
        } else {
            read_tail(&log_path, self.tail_lines)?
        };
        debug!("Quality gate '{}' finished with {} in {:?}", command, exit_code, duration);

        Ok(GateReport {
            command,
            passed,
            exit_code,
            duration,
            tail,
            log_path,
        })
    }
}

/// Last `n` output lines, skipping the `$ command` header. Output that is
/// not UTF-8 is decoded lossily.
fn read_tail(path: &Path, n: usize) -> Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().skip(1).collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

/// Deterministic log name: sanitized command plus a short hash that keeps
/// distinct commands from colliding after sanitizing.
pub fn log_file_name(command: &str) -> String {
    let mut name = String::with_capacity(command.len());
    for c in command.chars() {
        let keep = c.is_ascii_alphanumeric() || c == '.' || c == '-';
        let c = if keep { c } else { '_' };
        if c == '_' && name.ends_with('_') {
            continue;
        }
        name.push(c);
    }
    let mut name = name.trim_matches('_').to_string();
    name.truncate(MAX_NAME_LEN);
    if name.is_empty() {
        name.push_str("command");
    }

    let digest = hex::encode(Sha256::digest(command.as_bytes()));
    format!("{}-{}.log", name, &digest[..8])
}

/// Logs go to the workspace's `logs/` when `work_dir` is inside a workspace,
/// else to the repository's shared `.ralph/logs/`.
pub fn resolve_logs_dir(work_dir: &Path) -> PathBuf {
    if let Some((root, name)) = workspace_of(work_dir) {
        return RepoPaths::new(root).workspace(&name).logs();
    }
    match RepoPaths::discover(work_dir) {
        Some(repo) => repo.logs_dir(),
        None => RepoPaths::new(work_dir).logs_dir(),
    }
}
