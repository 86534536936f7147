//! Loop engine - drives the agent one story at a time.
//!
//! The PRD on disk is the only state. It is re-read at the top of every
//! iteration and after every agent call, because the agent edits it.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentInvoker, AgentRequest};
use crate::clock::Clock;
use crate::daemon::LoopRunner;
use crate::error::{RalphError, Result};
use crate::events::{Event, EventSink, Phase, event_types};
use crate::prd::{self, Prd, PrdPhase};
use crate::prompt::{self, PromptContext};

/// Name of the advisory completion file written next to the PRD
pub const SENTINEL_FILE: &str = ".complete";

/// Where and how long to run.
#[derive(Debug, Clone)]
pub struct LoopParams {
    pub work_dir: PathBuf,
    pub prd_path: PathBuf,
    pub progress_path: PathBuf,
    pub max_iterations: u32,
    pub quality_checks: Vec<String>,
}

impl LoopParams {
    pub fn sentinel_path(&self) -> PathBuf {
        self.prd_path.with_file_name(SENTINEL_FILE)
    }

    fn prompt_context(&self) -> PromptContext {
        PromptContext {
            prd_path: self.prd_path.clone(),
            progress_path: self.progress_path.clone(),
            sentinel_path: self.sentinel_path(),
            quality_checks: self.quality_checks.clone(),
        }
    }
}

pub struct LoopEngine {
    agent: Arc<dyn AgentInvoker>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl LoopEngine {
    pub fn new(agent: Arc<dyn AgentInvoker>, events: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self { agent, events, clock }
    }

    /// Iterate until the PRD is complete, the budget is spent, or `cancel`
    /// fires. Cancellation is checked between iterations only; an agent call
    /// already in flight runs to the end.
    pub async fn run(&self, cancel: &CancellationToken, params: &LoopParams) -> Result<()> {
        let result = self.iterate(cancel, params).await;
        match &result {
            Ok(iterations) => {
                info!("PRD complete after {} iteration(s)", iterations);
                self.emit(
                    Event::new(
                        event_types::LOOP_COMPLETE,
                        self.clock.now(),
                        format!("PRD complete after {} iteration(s)", iterations),
                    ),
                );
            }
            Err(RalphError::Cancelled) => {
                info!("Loop cancelled");
                self.emit(Event::new(event_types::LOOP_CANCELLED, self.clock.now(), "Loop cancelled"));
            }
            Err(e) => {
                warn!("Loop failed: {}", e);
                self.emit(Event::new(event_types::LOOP_FAILED, self.clock.now(), e.to_string()));
            }
        }
        result.map(|_| ())
    }

    async fn iterate(&self, cancel: &CancellationToken, params: &LoopParams) -> Result<u32> {
        self.ensure_progress_file(params)?;
        let budget = params.max_iterations;
        let mut iteration = 0;

        loop {
            // 1. Stop between iterations if asked
            if cancel.is_cancelled() {
                return Err(RalphError::Cancelled);
            }

            // 2. Fresh PRD every time
            let prd = prd::load(&params.prd_path)?;
            if prd.is_complete() {
                remove_sentinel(params);
                return Ok(iteration);
            }

            // 3. Budget
            if iteration >= budget {
                return Err(RalphError::MaxIterations(budget));
            }
            iteration += 1;
            self.events.begin_iteration(iteration);
            self.emit(
                Event::new(
                    event_types::ITERATION_STARTED,
                    self.clock.now(),
                    format!(
                        "Iteration {}: {}/{} stories, {}/{} tests passing",
                        iteration,
                        prd.stories_passed(),
                        prd.user_stories.len(),
                        prd.tests_passed(),
                        prd.integration_tests.len()
                    ),
                )
                .iteration(iteration, budget),
            );

            // 4. Story or QA work
            match prd.phase() {
                PrdPhase::Stories => self.story_step(&prd, iteration, params).await?,
                PrdPhase::Qa => self.qa_cycle(&prd, iteration, params).await?,
                PrdPhase::Complete => {}
            }
        }
    }

    async fn story_step(&self, prd: &Prd, iteration: u32, params: &LoopParams) -> Result<()> {
        let Some(story) = prd.next_story() else {
            return Ok(());
        };
        info!("Iteration {}: story {} ({})", iteration, story.id, story.title);
        self.emit(
            Event::new(
                event_types::PHASE_ENTERED,
                self.clock.now(),
                format!("Working on {}: {}", story.id, story.title),
            )
            .iteration(iteration, params.max_iterations)
            .phase(Phase::Story)
            .story(&story.id),
        );

        remove_sentinel(params);
        let prompt = prompt::story(prd, story, &params.prompt_context());
        self.invoke(prompt, iteration, Phase::Story, params).await?;

        // The sentinel is a hint; the PRD decides
        let sentinel = params.sentinel_path();
        if sentinel.exists() {
            remove_sentinel(params);
            let after = prd::load(&params.prd_path)?;
            if !after.is_complete() {
                let failing: Vec<String> = after.failing_tests().iter().map(|t| t.id.clone()).collect();
                info!("Agent signalled completion but the PRD is not complete; continuing");
                self.emit(
                    Event::new(
                        event_types::COMPLETION_IGNORED,
                        self.clock.now(),
                        format!(
                            "Completion signal ignored: {}/{} stories and {}/{} tests passing",
                            after.stories_passed(),
                            after.user_stories.len(),
                            after.tests_passed(),
                            after.integration_tests.len()
                        ),
                    )
                    .iteration(iteration, params.max_iterations)
                    .tests(failing),
                );
            }
        }
        Ok(())
    }

    /// Verify, then fix whatever is still failing. One cycle is one iteration.
    async fn qa_cycle(&self, prd: &Prd, iteration: u32, params: &LoopParams) -> Result<()> {
        let ctx = params.prompt_context();
        let pending: Vec<String> = prd.failing_tests().iter().map(|t| t.id.clone()).collect();
        info!("Iteration {}: QA verification of {} test(s)", iteration, pending.len());
        self.emit(
            Event::new(
                event_types::PHASE_ENTERED,
                self.clock.now(),
                format!("Verifying {} integration test(s)", prd.integration_tests.len()),
            )
            .iteration(iteration, params.max_iterations)
            .phase(Phase::QaVerify)
            .tests(pending),
        );
        self.invoke(prompt::qa_verify(prd, &ctx), iteration, Phase::QaVerify, params)
            .await?;

        let after = prd::load(&params.prd_path)?;
        if after.phase() != PrdPhase::Qa {
            debug!("QA verification left phase {:?}", after.phase());
            return Ok(());
        }

        let failing = after.failing_tests();
        let ids: Vec<String> = failing.iter().map(|t| t.id.clone()).collect();
        info!("Iteration {}: QA fix for {}", iteration, ids.join(", "));
        self.emit(
            Event::new(
                event_types::PHASE_ENTERED,
                self.clock.now(),
                format!("Fixing {} failing test(s)", ids.len()),
            )
            .iteration(iteration, params.max_iterations)
            .phase(Phase::QaFix)
            .tests(ids),
        );
        self.invoke(prompt::qa_fix(&after, &failing, &ctx), iteration, Phase::QaFix, params)
            .await
    }

    /// A non-zero agent exit just consumes the iteration; failing to launch
    /// the agent at all is fatal.
    async fn invoke(&self, prompt: String, iteration: u32, phase: Phase, params: &LoopParams) -> Result<()> {
        let request = AgentRequest::headless(prompt, &params.work_dir);
        match self.agent.invoke(request).await {
            Ok(output) => {
                debug!("Agent ({}) returned {} bytes", phase, output.len());
                Ok(())
            }
            Err(RalphError::Agent(message)) => {
                warn!("Agent failed during {} in iteration {}: {}", phase, iteration, message);
                self.emit(
                    Event::new(
                        event_types::AGENT_FAILED,
                        self.clock.now(),
                        format!("Agent failed: {}", message),
                    )
                    .iteration(iteration, params.max_iterations)
                    .phase(phase),
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_progress_file(&self, params: &LoopParams) -> Result<()> {
        if params.progress_path.exists() {
            return Ok(());
        }
        let prd = prd::load(&params.prd_path)?;
        if let Some(parent) = params.progress_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&params.progress_path, prd::progress_header(&prd))?;
        debug!("Created progress log {}", params.progress_path.display());
        Ok(())
    }

    fn emit(&self, event: Event) {
        self.events.emit(event);
    }
}

fn remove_sentinel(params: &LoopParams) {
    let path = params.sentinel_path();
    if let Err(e) = fs::remove_file(&path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

/// A `LoopEngine` bound to one workspace, runnable by the daemon host.
pub struct EngineRunner {
    engine: LoopEngine,
    params: LoopParams,
}

impl EngineRunner {
    pub fn new(engine: LoopEngine, params: LoopParams) -> Self {
        Self { engine, params }
    }
}

#[async_trait]
impl LoopRunner for EngineRunner {
    async fn run_loop(&self, cancel: CancellationToken) -> Result<()> {
        self.engine.run(&cancel, &self.params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::events::MemorySink;
    use crate::prd::{IntegrationTest, Story};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Script = Box<dyn Fn(&Path, &str, usize) -> Result<()> + Send + Sync>;

    /// Agent that edits the PRD according to a script.
    struct ScriptedAgent {
        prd_path: PathBuf,
        script: Script,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new<F>(prd_path: &Path, script: F) -> Arc<Self>
        where
            F: Fn(&Path, &str, usize) -> Result<()> + Send + Sync + 'static,
        {
            Arc::new(Self {
                prd_path: prd_path.to_path_buf(),
                script: Box::new(script),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedAgent {
        async fn invoke(&self, request: AgentRequest) -> Result<String> {
            let call = {
                let mut prompts = self.prompts.lock().unwrap();
                prompts.push(request.prompt.clone());
                prompts.len() - 1
            };
            (self.script)(&self.prd_path, &request.prompt, call)?;
            Ok(String::new())
        }
    }

    fn story(id: &str, priority: i64, passes: bool) -> Story {
        Story {
            id: id.to_string(),
            title: format!("Story {}", id),
            priority,
            passes,
            ..Default::default()
        }
    }

    fn test_item(id: &str, passes: bool) -> IntegrationTest {
        IntegrationTest {
            id: id.to_string(),
            description: format!("Test {}", id),
            passes,
            ..Default::default()
        }
    }

    fn setup(stories: Vec<Story>, tests: Vec<IntegrationTest>, max_iterations: u32) -> (TempDir, LoopParams) {
        let temp = TempDir::new().unwrap();
        let prd = Prd {
            project: "demo".to_string(),
            branch_name: "ralph/demo".to_string(),
            user_stories: stories,
            integration_tests: tests,
            ..Default::default()
        };
        let prd_path = temp.path().join("prd.json");
        prd::save(&prd_path, &prd).unwrap();
        let params = LoopParams {
            work_dir: temp.path().to_path_buf(),
            prd_path,
            progress_path: temp.path().join("progress.txt"),
            max_iterations,
            quality_checks: vec!["cargo test".to_string()],
        };
        (temp, params)
    }

    fn engine(agent: Arc<ScriptedAgent>, sink: Arc<MemorySink>) -> LoopEngine {
        LoopEngine::new(agent, sink, Arc::new(SystemClock))
    }

    fn is_story(prompt: &str) -> bool {
        prompt.starts_with("You are working through the PRD")
    }

    fn edit(path: &Path, f: impl FnOnce(&mut Prd)) -> Result<()> {
        let mut prd = prd::load(path)?;
        f(&mut prd);
        prd::save(path, &prd)
    }

    fn is_fix(prompt: &str) -> bool {
        prompt.starts_with("Integration tests are failing")
    }

    fn is_verify(prompt: &str) -> bool {
        prompt.starts_with("All user stories")
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![], 1);
        let agent = ScriptedAgent::new(&params.prd_path, |_, _, _| Ok(()));

        let err = engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap_err();

        assert!(matches!(err, RalphError::MaxIterations(1)));
        assert!(err.to_string().contains("maximum iterations (1)"));
        assert_eq!(agent.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_already_complete_makes_no_calls() {
        let (_temp, params) = setup(vec![story("S-1", 1, true)], vec![test_item("IT-1", true)], 3);
        let agent = ScriptedAgent::new(&params.prd_path, |_, _, _| Ok(()));

        engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap();

        assert!(agent.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_no_integration_tests_never_enters_qa() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![], 3);
        let agent = ScriptedAgent::new(&params.prd_path, |path, _, _| {
            edit(path, |p| p.user_stories[0].passes = true)
        });

        engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap();

        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(is_story(&prompts[0]));
    }

    #[tokio::test]
    async fn test_qa_verify_resolves_without_fix() {
        let (_temp, params) = setup(vec![story("S-1", 1, true)], vec![test_item("IT-1", false)], 3);
        let agent = ScriptedAgent::new(&params.prd_path, |path, _, _| {
            edit(path, |p| p.integration_tests[0].passes = true)
        });

        engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap();

        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(is_verify(&prompts[0]));
    }

    #[tokio::test]
    async fn test_each_fix_resolves_one_test() {
        let (_temp, params) = setup(
            vec![story("S-1", 1, true)],
            vec![test_item("IT-1", false), test_item("IT-2", false)],
            5,
        );
        let agent = ScriptedAgent::new(&params.prd_path, |path, prompt, _| {
            if !is_fix(prompt) {
                return Ok(());
            }
            edit(path, |p| {
                if let Some(t) = p.integration_tests.iter_mut().find(|t| !t.passes) {
                    t.passes = true;
                }
            })
        });

        engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap();

        let prompts = agent.prompts();
        assert_eq!(prompts.iter().filter(|p| is_fix(p)).count(), 2);
        assert_eq!(prompts.iter().filter(|p| is_verify(p)).count(), 2);
    }

    #[tokio::test]
    async fn test_story_phase_precedes_qa() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![test_item("IT-1", false)], 1);
        let agent = ScriptedAgent::new(&params.prd_path, |_, _, _| Ok(()));

        let _ = engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await;

        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(is_story(&prompts[0]));
    }

    #[tokio::test]
    async fn test_tie_break_uses_document_order() {
        let (_temp, params) = setup(
            vec![story("S-late", 5, false), story("S-b", 2, false), story("S-a", 2, false)],
            vec![],
            1,
        );
        let agent = ScriptedAgent::new(&params.prd_path, |_, _, _| Ok(()));

        let _ = engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await;

        assert!(agent.prompts()[0].contains("S-b - Story S-b"));
    }

    #[tokio::test]
    async fn test_completion_signal_ignored_while_tests_fail() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![test_item("IT-1", false)], 3);
        let sentinel = params.sentinel_path();
        let agent = ScriptedAgent::new(
            &params.prd_path,
            move |path, prompt, _| {
                if is_story(prompt) {
                    edit(path, |p| p.user_stories[0].passes = true)?;
                    fs::write(&sentinel, "")?;
                } else if prompt.starts_with("All user stories") {
                    edit(path, |p| p.integration_tests[0].passes = true)?;
                }
                Ok(())
            },
        );
        let sink = Arc::new(MemorySink::new());

        engine(agent.clone(), sink.clone())
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap();

        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("All user stories"));
        assert!(sink.types().contains(&event_types::COMPLETION_IGNORED.to_string()));
        assert!(!params.sentinel_path().exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![], 5);
        let agent = ScriptedAgent::new(&params.prd_path, |_, _, _| Ok(()));
        let sink = Arc::new(MemorySink::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine(agent.clone(), sink.clone()).run(&cancel, &params).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(agent.prompts().is_empty());
        assert_eq!(sink.types(), vec![event_types::LOOP_CANCELLED]);
    }

    #[tokio::test]
    async fn test_cancel_lets_current_iteration_finish() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![], 5);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let agent = ScriptedAgent::new(
            &params.prd_path,
            move |_, _, _| {
                trigger.cancel();
                Ok(())
            },
        );

        let err = engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&cancel, &params)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(agent.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_failure_consumes_iteration() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![], 2);
        let agent = ScriptedAgent::new(
            &params.prd_path,
            |_, _, _| Err(RalphError::Agent("exit code Some(1)".into())),
        );
        let sink = Arc::new(MemorySink::new());

        let err = engine(agent.clone(), sink.clone())
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap_err();

        assert!(matches!(err, RalphError::MaxIterations(2)));
        assert_eq!(agent.prompts().len(), 2);
        let failures = sink
            .types()
            .into_iter()
            .filter(|t| t == event_types::AGENT_FAILED)
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_unavailable_agent_is_fatal() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![], 5);
        let agent = ScriptedAgent::new(
            &params.prd_path,
            |_, _, _| Err(RalphError::AgentUnavailable("claude: not found".into())),
        );

        let err = engine(agent.clone(), Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap_err();

        assert!(matches!(err, RalphError::AgentUnavailable(_)));
        assert_eq!(agent.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_creates_progress_log() {
        let (_temp, params) = setup(vec![story("S-1", 1, true)], vec![], 1);
        let agent = ScriptedAgent::new(&params.prd_path, |_, _, _| Ok(()));

        engine(agent, Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap();

        let progress = fs::read_to_string(&params.progress_path).unwrap();
        assert!(progress.starts_with("# Progress log: demo"));
    }

    #[tokio::test]
    async fn test_existing_progress_log_untouched() {
        let (_temp, params) = setup(vec![story("S-1", 1, true)], vec![], 1);
        fs::write(&params.progress_path, "notes from before\n").unwrap();
        let agent = ScriptedAgent::new(&params.prd_path, |_, _, _| Ok(()));

        engine(agent, Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(&params.progress_path).unwrap(), "notes from before\n");
    }

    #[tokio::test]
    async fn test_missing_prd_is_error() {
        let temp = TempDir::new().unwrap();
        let params = LoopParams {
            work_dir: temp.path().to_path_buf(),
            prd_path: temp.path().join("prd.json"),
            progress_path: temp.path().join("progress.txt"),
            max_iterations: 3,
            quality_checks: vec![],
        };
        let agent = ScriptedAgent::new(&params.prd_path, |_, _, _| Ok(()));

        let err = engine(agent, Arc::new(MemorySink::new()))
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap_err();
        assert!(matches!(err, RalphError::PrdNotFound(_)));
    }

    #[tokio::test]
    async fn test_events_carry_iteration_and_phase() {
        let (_temp, params) = setup(vec![story("S-1", 1, false)], vec![], 3);
        let agent = ScriptedAgent::new(
            &params.prd_path,
            |path, _, _| edit(path, |p| p.user_stories[0].passes = true),
        );
        let sink = Arc::new(MemorySink::new());

        engine(agent, sink.clone())
            .run(&CancellationToken::new(), &params)
            .await
            .unwrap();

        let events = sink.events();
        let phase = events
            .iter()
            .find(|e| e.event_type == event_types::PHASE_ENTERED)
            .unwrap();
        assert_eq!(phase.payload.iteration, Some(1));
        assert_eq!(phase.payload.max_iterations, Some(3));
        assert_eq!(phase.payload.phase, Some(Phase::Story));
        assert_eq!(phase.payload.story_id.as_deref(), Some("S-1"));
        assert_eq!(events.last().unwrap().event_type, event_types::LOOP_COMPLETE);
    }
}
