//! Rebase Conflict Resolver
//!
//! Starts a rebase and, while it stops on conflicts, hands the conflict to
//! the agent with enough context to resolve it:
//!
//! ```text
//! Started -> Conflicted -> Resolving -> Continuing -> Conflicted | Done
//!                              |
//!                              +-> (rebase no longer in progress) Done | Aborted
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::agent::{AgentInvoker, AgentRequest, Interaction};
use crate::error::{RalphError, Result};
use crate::prd;
use crate::prompt::{self, RebasePromptInput};
use crate::vcs::{RebaseStep, Vcs};

/// Progress-log lines included in the agent context.
pub const PROGRESS_LINES: usize = 40;
/// Each diff is cut to this many characters.
pub const DIFF_LIMIT: usize = 20_000;
pub const DEFAULT_MAX_ROUNDS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseState {
    Started,
    Conflicted,
    Resolving,
    Continuing,
    Done,
    Aborted,
}

impl fmt::Display for RebaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Conflicted => "conflicted",
            Self::Resolving => "resolving",
            Self::Continuing => "continuing",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// What to rebase and where the PRD context lives.
#[derive(Debug, Clone)]
pub struct RebaseRequest {
    pub onto: String,
    pub work_dir: PathBuf,
    pub prd_path: PathBuf,
    pub progress_path: PathBuf,
    pub max_turns: u32,
    /// Headless, or sharing the caller's terminal
    pub interaction: Interaction,
}

/// Terminal state and how many agent rounds it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebaseReport {
    pub state: RebaseState,
    pub rounds: u32,
}

pub struct RebaseResolver {
    /// VCS bound to the work tree being rebased
    vcs: Arc<dyn Vcs>,
    agent: Arc<dyn AgentInvoker>,
    max_rounds: u32,
}

impl RebaseResolver {
    pub fn new(vcs: Arc<dyn Vcs>, agent: Arc<dyn AgentInvoker>) -> Self {
        Self {
            vcs,
            agent,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Rebase the current branch onto `request.onto`.
    ///
    /// Returns `RebaseStuck` after aborting when conflicts persist past the
    /// round limit. An agent failure also aborts the rebase.
    pub async fn run(&self, request: &RebaseRequest) -> Result<RebaseReport> {
        let feature = self.vcs.current_branch().await?;
        let mut state = RebaseState::Started;
        info!("Rebasing {} onto {}", feature, request.onto);

        if self.vcs.rebase_start(&request.onto).await? == RebaseStep::Clean {
            return Ok(self.finish(RebaseState::Done, 0));
        }

        let mut rounds = 0;
        loop {
            transition(&mut state, RebaseState::Conflicted);
            if rounds >= self.max_rounds {
                warn!("Conflicts remain after {} rounds, aborting rebase", rounds);
                self.vcs.rebase_abort().await?;
                return Err(RalphError::RebaseStuck(rounds));
            }
            rounds += 1;

            let conflicted = self.vcs.conflicted_files().await?;
            let prompt = prompt::rebase(&self.context(request, &feature, conflicted).await?);

            transition(&mut state, RebaseState::Resolving);
            let invocation = AgentRequest::headless(prompt, &request.work_dir)
                .with_max_turns(request.max_turns)
                .with_interaction(request.interaction);
            if let Err(e) = self.agent.invoke(invocation).await {
                warn!("Agent failed while resolving conflicts: {}", e);
                if let Err(abort) = self.vcs.rebase_abort().await {
                    debug!("rebase abort after agent failure: {}", abort);
                }
                return Err(e);
            }

            if !self.vcs.rebase_in_progress().await? {
                // The agent finished or aborted the rebase itself
                let end = if self.vcs.is_ancestor(&request.onto, "HEAD").await? {
                    RebaseState::Done
                } else {
                    RebaseState::Aborted
                };
                return Ok(self.finish(end, rounds));
            }

            transition(&mut state, RebaseState::Continuing);
            if self.vcs.rebase_continue().await? == RebaseStep::Clean {
                return Ok(self.finish(RebaseState::Done, rounds));
            }
        }
    }

    fn finish(&self, state: RebaseState, rounds: u32) -> RebaseReport {
        info!("Rebase {} after {} agent round(s)", state, rounds);
        RebaseReport { state, rounds }
    }

    async fn context(&self, request: &RebaseRequest, feature: &str, conflicted_files: Vec<String>) -> Result<RebasePromptInput> {
        let (description, stories) = match prd::load(&request.prd_path) {
            Ok(prd) => {
                let stories = prd
                    .user_stories
                    .iter()
                    .map(|s| {
                        let mark = if s.passes { "x" } else { " " };
                        format!("- [{}] {}: {}", mark, s.id, s.title)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                (prd.description, stories)
            }
            Err(e) => {
                debug!("No PRD context for rebase: {}", e);
                (String::new(), "- (no PRD)".to_string())
            }
        };

        let progress = std::fs::read_to_string(&request.progress_path)
            .map(|text| last_lines(&text, PROGRESS_LINES))
            .unwrap_or_default();

        let base = self.vcs.merge_base(&request.onto, feature).await?;
        let feature_diff = self.vcs.diff(&base, feature).await?;
        let target_diff = self.vcs.diff(&base, &request.onto).await?;

        Ok(RebasePromptInput {
            onto: request.onto.clone(),
            description,
            stories,
            progress,
            conflicted_files,
            feature_diff: truncate(&feature_diff, DIFF_LIMIT),
            target_diff: truncate(&target_diff, DIFF_LIMIT),
        })
    }
}

fn transition(state: &mut RebaseState, next: RebaseState) {
    debug!("rebase: {} -> {}", state, next);
    *state = next;
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Cut `text` to at most `limit` characters, marking the cut.
fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((at, _)) => format!("{}\n... (truncated)", &text[..at]),
        None => text.to_string(),
    }
}
