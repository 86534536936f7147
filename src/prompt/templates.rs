//! Prompt templates. `{{name}}` placeholders are filled by `render`.

pub const STORY: &str = r#"You are working through the PRD for project "{{project}}" on branch {{branch}}.

PRD file: {{prd_path}}
Progress log: {{progress_path}}

## Your task
Implement exactly one user story: {{story_id}} - {{story_title}}

{{story_description}}

Acceptance criteria:
{{acceptance_criteria}}

## Rules
1. Read the progress log first; it records what earlier iterations learned.
2. Keep the change focused on this story.
3. Run every quality check below and make them pass:
{{quality_checks}}
4. When the story is done and all checks pass, set `"passes": true` for {{story_id}} in the PRD file and commit your work.
5. Append a short entry to the progress log: what you changed, what you learned.
6. If you believe the whole PRD is complete, create the file {{sentinel_path}}. The PRD file remains the source of truth.
"#;

pub const QA_VERIFY: &str = r#"All user stories for project "{{project}}" are implemented. Verify the integration tests.

PRD file: {{prd_path}}
Progress log: {{progress_path}}

## Integration tests
{{tests}}

## Your task
1. Build whatever harness is needed to exercise each test's steps against the real system.
2. Run each test. For every test, update the PRD: set `"passes"` to true or false, and on failure record what went wrong in `"failure"`.
3. Do not change application code in this step.
4. Quality checks available:
{{quality_checks}}
5. Append a summary of the verification run to the progress log.
"#;

pub const QA_FIX: &str = r#"Integration tests are failing for project "{{project}}".

PRD file: {{prd_path}}
Progress log: {{progress_path}}

## Failing tests
{{failing_tests}}

## Your task
1. Make the smallest code change that fixes these failures.
2. Run the quality checks:
{{quality_checks}}
3. Re-run the failing tests. Update `"passes"` and `"failure"` for each in the PRD.
4. Commit your work and append what you fixed to the progress log.
"#;

pub const REBASE: &str = r#"A rebase of this branch onto {{onto}} stopped with conflicts.

## Project
{{description}}

## Stories
{{stories}}

## Recent progress
{{progress}}

## Conflicted files
{{conflicted_files}}

## Changes on this branch since the merge-base
```diff
{{feature_diff}}
```

## Changes on {{onto}} since the merge-base
```diff
{{target_diff}}
```

## Your task
Resolve every conflict so that both sides' intent is preserved. Stage the resolved files and run `git rebase --continue`.
If the conflicts cannot be resolved sensibly, run `git rebase --abort` and explain why.
"#;
