//! Workspaces: isolated work trees, each with its own PRD and daemon.

mod context;
mod copy;
mod manager;
mod registry;

pub use context::{BASE_CONTEXT, WORKSPACE_ENV, WorkContext};
pub use copy::copy_patterns;
pub use manager::WorkspaceManager;
pub use registry::{Registry, Workspace, WorkspaceEntry, validate_name};
