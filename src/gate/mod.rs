//! Quality Gate Runner
//!
//! Runs an arbitrary command, keeps its full combined output in a log file,
//! and reports PASS/FAIL with a bounded tail. A failing command is a normal
//! outcome; only log I/O problems are errors.

mod runner;

pub use runner::{GateReport, GateRunner, log_file_name, resolve_logs_dir};
