//! CLI module for ralph - command-line interface and subcommands.
//!
//! `commands` defines the clap surface, `handlers` turns each command into
//! calls on the library.

pub mod commands;
pub mod handlers;

pub use commands::{Cli, Commands, DAEMON_COMMAND, WorkspaceCommands};
pub use handlers::{App, dispatch};
