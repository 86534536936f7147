//! Agent invocation.
//!
//! The agent is an external process that edits the work tree and the PRD.
//! Ralph treats one invocation as a single opaque blocking call.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;

use crate::config::AgentConfig;
use crate::error::{RalphError, Result};

/// Whether the agent talks to the user's terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// Prompt passed on the command line; output captured
    Headless,
    /// Inherits the terminal; output not captured
    Interactive,
}

/// One agent call.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub work_dir: PathBuf,
    pub interaction: Interaction,
    pub max_turns: Option<u32>,
}

impl AgentRequest {
    pub fn headless(prompt: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            work_dir: work_dir.into(),
            interaction: Interaction::Headless,
            max_turns: None,
        }
    }

    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interaction = interaction;
        self
    }
}

/// Runs the agent.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Returns captured output (empty for interactive runs).
    async fn invoke(&self, request: AgentRequest) -> Result<String>;
}

/// Agent launched as a configured command line.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    config: AgentConfig,
}

impl CommandAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Arguments for one request, excluding the program itself.
    pub fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = self.config.args.clone();
        if let (Some(flag), Some(turns)) = (&self.config.max_turns_flag, request.max_turns) {
            args.push(flag.clone());
            args.push(turns.to_string());
        }
        match request.interaction {
            Interaction::Headless => {
                args.push(self.config.print_flag.clone());
                args.push(request.prompt.clone());
            }
            Interaction::Interactive => args.push(request.prompt.clone()),
        }
        args
    }
}

#[async_trait]
impl AgentInvoker for CommandAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<String> {
        let args = self.build_args(&request);
        info!(
            "Invoking agent '{}' in {} ({:?})",
            self.config.command,
            request.work_dir.display(),
            request.interaction
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&args).current_dir(&request.work_dir);

        match request.interaction {
            Interaction::Headless => {
                cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
                let output = cmd
                    .output()
                    .await
                    .map_err(|e| RalphError::AgentUnavailable(format!("{}: {}", self.config.command, e)))?;
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!("Agent exited with {:?}", output.status.code());
                    return Err(RalphError::Agent(format!(
                        "exit code {:?}: {}",
                        output.status.code(),
                        stderr.trim()
                    )));
                }
                debug!("Agent produced {} bytes of output", stdout.len());
                Ok(stdout)
            }
            Interaction::Interactive => {
                let status = cmd
                    .status()
                    .await
                    .map_err(|e| RalphError::AgentUnavailable(format!("{}: {}", self.config.command, e)))?;
                if !status.success() {
                    return Err(RalphError::Agent(format!("exit code {:?}", status.code())));
                }
                Ok(String::new())
            }
        }
    }
}
