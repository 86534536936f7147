//! CLI command definitions using clap.
//!
//! - run/attach/stop/status: drive and observe the daemon of one context
//! - check: quality gate used by the agent
//! - dashboard: live view over every workspace
//! - rebase/archive: branch and PRD housekeeping
//! - workspace: create/remove/list/switch/merge

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Name of the hidden subcommand the daemon process runs.
pub const DAEMON_COMMAND: &str = "__daemon";

/// Ralph - drive a coding agent through a PRD until it passes
#[derive(Parser, Debug)]
#[command(name = "ralph")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace to act on ("base" for the repository root)
    #[arg(short, long, global = true)]
    pub workspace: Option<String>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the loop (as a daemon unless --foreground)
    Run {
        /// Iteration budget (default from config)
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,

        /// Run in this process instead of a daemon
        #[arg(short, long, conflicts_with_all = ["detach", "tui"])]
        foreground: bool,

        /// Start the daemon and return immediately
        #[arg(short, long, conflicts_with = "tui")]
        detach: bool,

        /// Follow progress in the dashboard instead of plain text
        #[arg(long)]
        tui: bool,
    },

    /// Follow a running daemon
    Attach {
        #[arg(long)]
        tui: bool,
    },

    /// Stop the daemon (SIGTERM, then SIGKILL)
    Stop,

    /// Show daemon and PRD state of every context
    Status,

    /// Run a quality gate command, logging its full output
    Check {
        /// Command and arguments, e.g. `ralph check -- cargo test`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// Live view over all workspaces
    Dashboard,

    /// Rebase the context's branch, letting the agent resolve conflicts
    Rebase {
        /// Target ref (default: configured base branch)
        #[arg(long)]
        onto: Option<String>,

        /// Agent turn budget per resolution round
        #[arg(long)]
        max_turns: Option<u32>,

        /// Run the agent in this terminal instead of headless
        #[arg(short, long)]
        interactive: bool,
    },

    /// Move the PRD and progress log into the archive
    Archive,

    /// Workspace management
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },

    /// Daemon entry point (spawned by `run`)
    #[command(name = DAEMON_COMMAND, hide = true)]
    Daemon {
        #[arg(long)]
        max_iterations: u32,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum WorkspaceCommands {
    /// Create a workspace with its own work tree and branch
    Create {
        name: String,

        /// Branch name (default: <prefix><name>)
        #[arg(short, long)]
        branch: Option<String>,

        /// Base branch (default from config)
        #[arg(long)]
        base: Option<String>,

        /// Extra glob of untracked files to copy (repeatable)
        #[arg(long = "copy")]
        copy: Vec<String>,
    },

    /// Remove a workspace, its work tree and branch
    Remove { name: String },

    /// List workspaces
    List,

    /// Print the work tree of a workspace for the shell integration to cd into
    Switch { name: String },

    /// Squash-merge a workspace branch into the base branch
    Merge {
        /// Workspace (default: the current one)
        name: Option<String>,

        /// Target branch (default from config)
        #[arg(long)]
        into: Option<String>,
    },
}
