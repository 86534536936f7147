//! Prompt builders for each agent mode.

mod templates;

use std::path::PathBuf;

use crate::prd::{IntegrationTest, Prd, Story};

/// Paths and commands every loop prompt refers to.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub prd_path: PathBuf,
    pub progress_path: PathBuf,
    pub sentinel_path: PathBuf,
    pub quality_checks: Vec<String>,
}

/// Everything the agent is shown when resolving rebase conflicts.
#[derive(Debug, Clone, Default)]
pub struct RebasePromptInput {
    pub onto: String,
    pub description: String,
    pub stories: String,
    pub progress: String,
    pub conflicted_files: Vec<String>,
    pub feature_diff: String,
    pub target_diff: String,
}

/// Substitute `{{key}}` placeholders in one pass over the template.
///
/// Unknown placeholders are left as-is, and substituted values are never
/// scanned again, so a story text containing `{{...}}` reaches the agent
/// verbatim.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };
        let key = &after[..end];
        match vars.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push_str("{{");
                out.push_str(key);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
}

fn quality_checks(ctx: &PromptContext) -> String {
    if ctx.quality_checks.is_empty() {
        return "   - (none configured)".to_string();
    }
    ctx.quality_checks
        .iter()
        .map(|c| format!("   - `ralph check -- {}`", c))
        .collect::<Vec<_>>()
        .join("\n")
}

fn common(prd: &Prd, ctx: &PromptContext) -> Vec<(&'static str, String)> {
    vec![
        ("project", prd.project.clone()),
        ("branch", prd.branch_name.clone()),
        ("prd_path", ctx.prd_path.display().to_string()),
        ("progress_path", ctx.progress_path.display().to_string()),
        ("sentinel_path", ctx.sentinel_path.display().to_string()),
        ("quality_checks", quality_checks(ctx)),
    ]
}

pub fn story(prd: &Prd, story: &Story, ctx: &PromptContext) -> String {
    let mut vars = common(prd, ctx);
    vars.push(("story_id", story.id.clone()));
    vars.push(("story_title", story.title.clone()));
    vars.push(("story_description", story.description.clone()));
    vars.push(("acceptance_criteria", bullet_list(&story.acceptance_criteria)));
    render(templates::STORY, &vars)
}

pub fn qa_verify(prd: &Prd, ctx: &PromptContext) -> String {
    let tests: Vec<String> = prd
        .integration_tests
        .iter()
        .map(|t| {
            let steps = t
                .steps
                .iter()
                .enumerate()
                .map(|(i, s)| format!("    {}. {}", i + 1, s))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{}: {}\n{}", t.id, t.description, steps)
        })
        .collect();
    let mut vars = common(prd, ctx);
    vars.push(("tests", bullet_list(&tests)));
    render(templates::QA_VERIFY, &vars)
}

pub fn qa_fix(prd: &Prd, failing: &[&IntegrationTest], ctx: &PromptContext) -> String {
    let items: Vec<String> = failing
        .iter()
        .map(|t| {
            let failure = if t.failure.is_empty() { "no failure recorded" } else { &t.failure };
            format!("{}: {}\n  Failure: {}", t.id, t.description, failure)
        })
        .collect();
    let mut vars = common(prd, ctx);
    vars.push(("failing_tests", bullet_list(&items)));
    render(templates::QA_FIX, &vars)
}

pub fn rebase(input: &RebasePromptInput) -> String {
    render(
        templates::REBASE,
        &[
            ("onto", input.onto.clone()),
            ("description", input.description.clone()),
            ("stories", input.stories.clone()),
            ("progress", input.progress.clone()),
            ("conflicted_files", bullet_list(&input.conflicted_files)),
            ("feature_diff", input.feature_diff.clone()),
            ("target_diff", input.target_diff.clone()),
        ],
    )
}
