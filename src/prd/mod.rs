//! The requirements document driving the loop.
//!
//! A PRD is owned by the agent: it flips `passes` flags and records failures
//! between iterations. Ralph only reads it and answers aggregate questions
//! about it.

mod store;

pub use store::{archive, archive_dir_name, load, save};
pub(crate) use store::progress_header;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{RalphError, Result};

/// The requirements document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prd {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "stories")]
    pub user_stories: Vec<Story>,
    #[serde(default)]
    pub integration_tests: Vec<IntegrationTest>,
}

/// One unit of developer-visible work.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Lower runs sooner
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub notes: String,
}

/// One end-to-end verification item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationTest {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub failure: String,
    #[serde(default)]
    pub notes: String,
}

/// Where the loop stands given the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrdPhase {
    /// Some story still pending
    Stories,
    /// Every story passes, some integration test does not
    Qa,
    /// Nothing left to do
    Complete,
}

impl Prd {
    /// Reject documents with duplicate story or test ids.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for story in &self.user_stories {
            if !seen.insert(story.id.as_str()) {
                return Err(RalphError::InvalidPrd(format!("duplicate story id '{}'", story.id)));
            }
        }
        let mut seen = HashSet::new();
        for test in &self.integration_tests {
            if !seen.insert(test.id.as_str()) {
                return Err(RalphError::InvalidPrd(format!(
                    "duplicate integration test id '{}'",
                    test.id
                )));
            }
        }
        Ok(())
    }

    pub fn all_stories_pass(&self) -> bool {
        self.user_stories.iter().all(|s| s.passes)
    }

    /// Vacuously true when there are no integration tests.
    pub fn all_tests_pass(&self) -> bool {
        self.integration_tests.iter().all(|t| t.passes)
    }

    pub fn is_complete(&self) -> bool {
        self.all_stories_pass() && self.all_tests_pass()
    }

    pub fn phase(&self) -> PrdPhase {
        if !self.all_stories_pass() {
            PrdPhase::Stories
        } else if self.all_tests_pass() {
            PrdPhase::Complete
        } else {
            PrdPhase::Qa
        }
    }

    /// Lowest-priority pending story; ties go to the earlier story in the
    /// document.
    pub fn next_story(&self) -> Option<&Story> {
        self.user_stories
            .iter()
            .filter(|s| !s.passes)
            .min_by_key(|s| s.priority)
    }

    pub fn failing_tests(&self) -> Vec<&IntegrationTest> {
        self.integration_tests.iter().filter(|t| !t.passes).collect()
    }

    pub fn stories_passed(&self) -> usize {
        self.user_stories.iter().filter(|s| s.passes).count()
    }

    pub fn tests_passed(&self) -> usize {
        self.integration_tests.iter().filter(|t| t.passes).count()
    }
}
