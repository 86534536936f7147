//! Daemon Host and Run State Tracker
//!
//! A daemon is a detached `ralph` process running one loop for one workspace.
//! It is addressed only through the workspace's files:
//! - `run.pid` while it lives
//! - `run.status.json` once it has finished
//! - `logs/*.jsonl` for progress

pub mod host;
pub mod liveness;
pub mod run_state;
pub mod spawn;
pub mod stop;

pub use host::{DaemonHost, LoopRunner, detach, install_signal_handlers};
pub use liveness::{OsProcess, ProcessLiveness, ProcessSignals};
pub use run_state::{PidGuard, RunResult, RunState, RunStatus};
pub use spawn::DaemonSpawner;
pub use stop::{StopOutcome, StopPolicy, stop_and_wait};
