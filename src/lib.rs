//! Ralph - an agent-driven PRD loop
//!
//! Ralph repeatedly hands a coding agent the next piece of a product
//! requirements document (PRD) until every user story and integration test
//! passes. Each unit of work can run in its own workspace: a VCS work tree
//! with a dedicated branch, PRD and background daemon.

pub mod agent;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod events;
pub mod fsutil;
pub mod gate;
pub mod paths;
pub mod prd;
pub mod prompt;
pub mod rebase;
pub mod tui;
pub mod vcs;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{RalphError, Result};
