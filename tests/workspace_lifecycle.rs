//! Workspace lifecycle integration tests
//!
//! create -> resolve context -> run a loop in it -> merge -> remove, against
//! a real git repository.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use ralph::RalphError;
use ralph::agent::{AgentInvoker, AgentRequest};
use ralph::clock::SystemClock;
use ralph::daemon::{DaemonHost, RunResult};
use ralph::engine::{EngineRunner, LoopEngine, LoopParams};
use ralph::error::Result;
use ralph::events::EventWriter;
use ralph::paths::RepoPaths;
use ralph::prd::{self, Prd, Story};
use ralph::vcs::GitCli;
use ralph::workspace::{Registry, WorkContext, WorkspaceManager};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn init_repo(parent: &Path) -> PathBuf {
    let repo = parent.join("repo");
    fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["checkout", "-q", "-b", "main"]);
    git(&repo, &["config", "user.email", "test@test.com"]);
    git(&repo, &["config", "user.name", "Test"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);
    fs::write(repo.join(".git/info/exclude"), ".ralph/\n").unwrap();
    fs::write(repo.join("README.md"), "# Test\n").unwrap();
    git(&repo, &["add", "-A"]);
    git(&repo, &["commit", "-q", "-m", "Initial commit"]);
    repo
}

/// Implements the story by committing a file, then marks it passing.
struct CommittingAgent {
    prd_path: PathBuf,
}

#[async_trait]
impl AgentInvoker for CommittingAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<String> {
        fs::write(request.work_dir.join("feature.txt"), "feature\n")?;
        git(&request.work_dir, &["add", "feature.txt"]);
        git(&request.work_dir, &["commit", "-q", "-m", "Add feature"]);

        let mut doc = prd::load(&self.prd_path)?;
        for story in &mut doc.user_stories {
            story.passes = true;
        }
        prd::save(&self.prd_path, &doc)?;
        Ok(String::new())
    }
}

fn manager(paths: &RepoPaths) -> WorkspaceManager {
    WorkspaceManager::new(paths.clone(), Arc::new(GitCli::new(paths.root())), Arc::new(SystemClock))
}

#[tokio::test]
async fn test_workspace_round_trip() {
    let temp = TempDir::new().unwrap();
    let root = init_repo(temp.path());
    let paths = RepoPaths::new(&root);
    let mgr = manager(&paths);
    let registry = Registry::new(paths.clone());

    // Create
    let ws = mgr.create("login", None, "main", &[]).await.unwrap();
    assert_eq!(ws.branch, "ralph/login");

    // Resolve: explicit, then from inside the tree
    let ctx = WorkContext::resolve(&paths, &registry, Some("login"), None, &root).unwrap();
    assert_eq!(ctx.display_name(), "login");
    let inside = WorkContext::resolve(&paths, &registry, None, None, &ctx.work_dir.join("src")).unwrap();
    assert_eq!(inside.work_dir, ctx.work_dir);
    let base = WorkContext::resolve(&paths, &registry, None, None, &root).unwrap();
    assert!(base.is_base());

    // Run a loop in the workspace
    let doc = Prd {
        project: "login".to_string(),
        branch_name: ws.branch.clone(),
        user_stories: vec![Story {
            id: "S-1".to_string(),
            title: "Login form".to_string(),
            priority: 1,
            ..Default::default()
        }],
        ..Default::default()
    };
    prd::save(&ctx.prd_path, &doc).unwrap();

    let events = Arc::new(EventWriter::new(&ctx.logs_dir, "run").unwrap());
    let clock = Arc::new(SystemClock);
    let agent = Arc::new(CommittingAgent {
        prd_path: ctx.prd_path.clone(),
    });
    let engine = LoopEngine::new(agent, events.clone(), clock.clone());
    let params = LoopParams {
        work_dir: ctx.work_dir.clone(),
        prd_path: ctx.prd_path.clone(),
        progress_path: ctx.progress_path.clone(),
        max_iterations: 3,
        quality_checks: Vec::new(),
    };
    let runner = Arc::new(EngineRunner::new(engine, params));
    let status = DaemonHost::new(runner, ctx.run_state(), events, clock)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status.result, RunResult::Success);
    assert_eq!(ctx.run_state().read_status().unwrap().map(|s| s.result), Some(RunResult::Success));

    // The base PRD is untouched by the workspace run
    assert!(!paths.prd().exists());

    // Merge into main
    mgr.merge("login", "main").await.unwrap();
    assert!(root.join("feature.txt").exists());
    let log = git(&root, &["log", "--oneline", "-1"]);
    assert!(log.contains("Merge workspace login (ralph/login)"));

    // Remove
    mgr.remove("login").await.unwrap();
    assert!(!paths.workspace("login").dir().exists());
    assert!(!git(&root, &["branch", "--list"]).contains("ralph/login"));
    let err = WorkContext::resolve(&paths, &registry, Some("login"), None, &root).unwrap_err();
    assert!(matches!(err, RalphError::WorkspaceNotFound(_)));
}

#[tokio::test]
async fn test_deleted_workspace_dir_is_reported_missing() {
    let temp = TempDir::new().unwrap();
    let root = init_repo(temp.path());
    let paths = RepoPaths::new(&root);
    let mgr = manager(&paths);

    mgr.create("gone", None, "main", &[]).await.unwrap();
    fs::remove_dir_all(paths.workspace("gone").dir()).unwrap();

    let registry = Registry::new(paths.clone());
    let entries = registry.list_with_missing().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].missing);

    let err = WorkContext::resolve(&paths, &registry, Some("gone"), None, &root).unwrap_err();
    assert!(matches!(err, RalphError::WorkspaceMissing(_)));

    // Removal still cleans up the registry entry
    mgr.remove("gone").await.unwrap();
    assert!(registry.list().unwrap().is_empty());
}
