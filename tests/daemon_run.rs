//! Daemon run integration tests
//!
//! Drives a full daemon run (host + loop engine + event log) in process with
//! a scripted agent, then observes it the way `ralph attach` does.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ralph::agent::{AgentInvoker, AgentRequest};
use ralph::clock::SystemClock;
use ralph::daemon::{DaemonHost, OsProcess, RunResult, RunState};
use ralph::engine::{EngineRunner, LoopEngine, LoopParams};
use ralph::error::Result;
use ralph::events::{EventCursor, EventWriter, TailEnd, event_types, tail};
use ralph::prd::{self, IntegrationTest, Prd, Story};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Marks the first failing story or test as passing on every call.
struct DiligentAgent {
    prd_path: PathBuf,
}

#[async_trait]
impl AgentInvoker for DiligentAgent {
    async fn invoke(&self, _request: AgentRequest) -> Result<String> {
        let mut doc = prd::load(&self.prd_path)?;
        if let Some(story) = doc.user_stories.iter_mut().find(|s| !s.passes) {
            story.passes = true;
        } else if let Some(test) = doc.integration_tests.iter_mut().find(|t| !t.passes) {
            test.passes = true;
        }
        prd::save(&self.prd_path, &doc)?;
        Ok("done".to_string())
    }
}

/// Never changes anything.
struct IdleAgent;

#[async_trait]
impl AgentInvoker for IdleAgent {
    async fn invoke(&self, _request: AgentRequest) -> Result<String> {
        Ok(String::new())
    }
}

struct Fixture {
    _temp: TempDir,
    params: LoopParams,
    logs: PathBuf,
    run_state: RunState,
}

fn fixture(max_iterations: u32) -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let doc = Prd {
        project: "demo".to_string(),
        branch_name: "ralph/demo".to_string(),
        user_stories: vec![
            Story {
                id: "S-1".to_string(),
                title: "First".to_string(),
                priority: 1,
                ..Default::default()
            },
            Story {
                id: "S-2".to_string(),
                title: "Second".to_string(),
                priority: 2,
                ..Default::default()
            },
        ],
        integration_tests: vec![IntegrationTest {
            id: "IT-1".to_string(),
            description: "end to end".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };
    let prd_path = root.join("prd.json");
    prd::save(&prd_path, &doc).unwrap();

    Fixture {
        params: LoopParams {
            work_dir: root.to_path_buf(),
            prd_path,
            progress_path: root.join("progress.txt"),
            max_iterations,
            quality_checks: vec!["cargo test".to_string()],
        },
        logs: root.join("logs"),
        run_state: RunState::new(root.join("run.pid"), root.join("run.status.json"), Arc::new(OsProcess)),
        _temp: temp,
    }
}

fn host(fx: &Fixture, agent: Arc<dyn AgentInvoker>) -> DaemonHost {
    let events = Arc::new(EventWriter::new(&fx.logs, "20250601-120000").unwrap());
    let clock = Arc::new(SystemClock);
    let engine = LoopEngine::new(agent, events.clone(), clock.clone());
    let runner = Arc::new(EngineRunner::new(engine, fx.params.clone()));
    DaemonHost::new(runner, fx.run_state.clone(), events, clock)
}

fn event_types_in(dir: &Path) -> Vec<String> {
    let mut cursor = EventCursor::new(dir);
    cursor.poll().unwrap().into_iter().map(|e| e.event_type).collect()
}

#[tokio::test]
async fn test_run_to_completion() {
    let fx = fixture(10);
    let agent = Arc::new(DiligentAgent {
        prd_path: fx.params.prd_path.clone(),
    });

    let status = host(&fx, agent).run(CancellationToken::new()).await.unwrap();

    assert_eq!(status.result, RunResult::Success);
    assert!(prd::load(&fx.params.prd_path).unwrap().is_complete());
    assert!(!fx.run_state.pid_path().exists());
    assert_eq!(fx.run_state.read_status().unwrap(), Some(status));

    let types = event_types_in(&fx.logs);
    assert_eq!(types.first().map(String::as_str), Some(event_types::DAEMON_STARTED));
    assert_eq!(types.last().map(String::as_str), Some(event_types::DAEMON_EXITED));
    assert!(types.iter().any(|t| t == event_types::LOOP_COMPLETE));
    // Two stories then one QA iteration
    let iterations = types.iter().filter(|t| *t == event_types::ITERATION_STARTED).count();
    assert_eq!(iterations, 3);
}

#[tokio::test]
async fn test_budget_exhausted_is_failure() {
    let fx = fixture(2);

    let status = host(&fx, Arc::new(IdleAgent)).run(CancellationToken::new()).await.unwrap();

    assert_eq!(status.result, RunResult::Failed);
    assert!(status.error.unwrap().contains("maximum iterations (2)"));
    assert!(!fx.run_state.is_running());
    assert!(event_types_in(&fx.logs).iter().any(|t| t == event_types::LOOP_FAILED));
}

#[tokio::test]
async fn test_cancelled_run_records_cancellation() {
    let fx = fixture(5);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let status = host(&fx, Arc::new(IdleAgent)).run(cancel).await.unwrap();

    assert_eq!(status.result, RunResult::Cancelled);
    assert_eq!(status.error, None);
    assert_eq!(fx.run_state.read_status().unwrap().map(|s| s.result), Some(RunResult::Cancelled));
}

#[tokio::test]
async fn test_attach_after_exit_replays_everything() {
    let fx = fixture(10);
    let agent = Arc::new(DiligentAgent {
        prd_path: fx.params.prd_path.clone(),
    });
    host(&fx, agent).run(CancellationToken::new()).await.unwrap();

    let mut cursor = EventCursor::new(&fx.logs);
    let mut seen = Vec::new();
    let end = tail(
        &mut cursor,
        &fx.run_state,
        Duration::from_millis(10),
        &CancellationToken::new(),
        |event| seen.push(event.event_type.clone()),
    )
    .await
    .unwrap();

    assert_eq!(end, TailEnd::DaemonExited);
    assert_eq!(seen, event_types_in(&fx.logs));
    assert!(cursor.poll().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_host_refused_while_running() {
    let fx = fixture(1);
    let _guard = fx.run_state.acquire(std::process::id()).unwrap();

    let err = host(&fx, Arc::new(IdleAgent)).run(CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ralph::RalphError::AlreadyRunning(_)));
    assert_eq!(fx.run_state.read_status().unwrap(), None);
}
