//! Error types for Ralph
//!
//! Centralized error handling using thiserror. Each workspace condition has
//! its own variant so the CLI can suggest the right remediation command.

use thiserror::Error;

/// All error types that can occur in Ralph
#[derive(Debug, Error)]
pub enum RalphError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workspace name fails validation
    #[error("Invalid workspace name '{0}': use only letters, digits, '.', '_' and '-'")]
    InvalidWorkspaceName(String),

    /// Workspace already registered or its directory already exists
    #[error("Workspace already exists: {0}")]
    WorkspaceExists(String),

    /// Workspace not present in the registry
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// Workspace registered but its directory is gone
    #[error("Workspace '{0}' is registered but its directory is missing")]
    WorkspaceMissing(String),

    /// No PRD at the expected location
    #[error("PRD not found at {0}")]
    PrdNotFound(String),

    /// PRD failed structural validation
    #[error("Invalid PRD: {0}")]
    InvalidPrd(String),

    /// A VCS operation failed
    #[error("VCS {op} failed: {message}")]
    Vcs { op: String, message: String },

    /// The agent ran but reported failure
    #[error("Agent error: {0}")]
    Agent(String),

    /// The agent process could not be started at all
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Iteration budget consumed without reaching completion
    #[error("maximum iterations ({0}) reached without completing the PRD")]
    MaxIterations(u32),

    /// The run was cancelled by a signal
    #[error("run cancelled")]
    Cancelled,

    /// A live daemon already owns the workspace
    #[error("Daemon already running (PID {0})")]
    AlreadyRunning(u32),

    /// Daemon did not write its PID file in time
    #[error("Daemon did not start within {0:?}")]
    DaemonStartTimeout(std::time::Duration),

    /// Daemon process exited before recording its PID
    #[error("Daemon exited during startup: {0}")]
    DaemonStartFailed(String),

    /// Daemon survived both termination and kill
    #[error("Daemon (PID {0}) did not exit after SIGTERM and SIGKILL")]
    DaemonStopTimeout(u32),

    /// Conflict resolution did not converge
    #[error("Rebase still conflicted after {0} resolution rounds")]
    RebaseStuck(u32),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RalphError {
    /// Build a VCS error tagged with the operation that failed
    pub fn vcs(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Vcs {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Whether this error represents cancellation rather than failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for Ralph operations
pub type Result<T> = std::result::Result<T, RalphError>;
