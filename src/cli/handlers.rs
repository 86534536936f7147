//! Command handlers.
//!
//! Library errors are turned into `eyre` reports here, with a next step for
//! the user where one exists.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use colored::*;
use eyre::{Result, bail, eyre};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use ralph::agent::{CommandAgent, Interaction};
use ralph::clock::{Clock, SystemClock};
use ralph::config::Config;
use ralph::daemon::{
    DaemonHost, DaemonSpawner, OsProcess, RunResult, RunState, StopOutcome, StopPolicy, detach,
    install_signal_handlers, stop_and_wait,
};
use ralph::engine::{EngineRunner, LoopEngine, LoopParams};
use ralph::error::RalphError;
use ralph::events::{
    Event, EventCursor, EventSink, EventWriter, StreamTiming, TailEnd, WatchTarget, interrupt_token, prune_logs, tail,
};
use ralph::gate::{GateRunner, resolve_logs_dir};
use ralph::paths::RepoPaths;
use ralph::prd;
use ralph::rebase::{RebaseRequest, RebaseResolver, RebaseState};
use ralph::tui::run_dashboard;
use ralph::vcs::{GitCli, Vcs};
use ralph::workspace::{BASE_CONTEXT, WORKSPACE_ENV, WorkContext, WorkspaceManager};

use super::commands::{Cli, Commands, DAEMON_COMMAND, WorkspaceCommands};

/// Marks a shell that wraps `ralph` and can `cd` on its behalf.
pub const SHELL_INTEGRATION_ENV: &str = "RALPH_SHELL_INTEGRATION";

/// Everything a handler needs.
pub struct App {
    pub config: Config,
    pub repo: Option<RepoPaths>,
    pub workspace: Option<String>,
    pub config_path: Option<PathBuf>,
}

impl App {
    fn repo(&self) -> Result<&RepoPaths> {
        self.repo
            .as_ref()
            .ok_or_else(|| eyre!("Not inside a git repository. Run ralph from your project directory."))
    }

    fn context(&self) -> Result<WorkContext> {
        let repo = self.repo()?;
        WorkContext::from_env(repo, self.workspace.as_deref()).map_err(explain)
    }

    fn manager(&self) -> Result<WorkspaceManager> {
        let repo = self.repo()?.clone();
        let vcs = Arc::new(GitCli::new(repo.root()));
        Ok(WorkspaceManager::new(repo, vcs, Arc::new(SystemClock)).with_config(&self.config.workspace))
    }

    fn stop_policy(&self) -> StopPolicy {
        StopPolicy::from(&self.config.daemon)
    }
}

/// Attach a remediation hint to library errors that have one.
pub fn explain(err: RalphError) -> eyre::Report {
    let hint = match &err {
        RalphError::WorkspaceNotFound(_) => Some("List workspaces with `ralph workspace list`."),
        RalphError::WorkspaceMissing(_) => {
            Some("Its directory was deleted. Clean up with `ralph workspace remove <name>`.")
        }
        RalphError::WorkspaceExists(_) => Some("Pick another name or remove the old one first."),
        RalphError::PrdNotFound(_) => Some("Write the PRD (prd.json) for this context first."),
        RalphError::AlreadyRunning(_) => Some("Follow it with `ralph attach` or stop it with `ralph stop`."),
        RalphError::AgentUnavailable(_) => Some("Check `agent.command` in your ralph config."),
        RalphError::RebaseStuck(_) => Some("Resolve the conflicts by hand, then run `ralph rebase` again."),
        _ => None,
    };
    match hint {
        Some(hint) => eyre!("{}\n  {} {}", err, "hint:".yellow(), hint),
        None => eyre!(err),
    }
}

/// Dispatch a parsed command; returns the process exit code.
pub async fn dispatch(cli: Cli, app: App) -> Result<i32> {
    match cli.command {
        Commands::Run {
            max_iterations,
            foreground,
            detach,
            tui,
        } => {
            let max = max_iterations.unwrap_or(app.config.run.max_iterations);
            handle_run(&app, max, foreground, detach, tui).await?;
        }
        Commands::Attach { tui } => handle_attach(&app, tui).await?,
        Commands::Stop => handle_stop(&app).await?,
        Commands::Status => handle_status(&app).await?,
        Commands::Check { argv } => return handle_check(&app, &argv).await,
        Commands::Dashboard => handle_dashboard(&app).await?,
        Commands::Rebase {
            onto,
            max_turns,
            interactive,
        } => handle_rebase(&app, onto, max_turns, interactive).await?,
        Commands::Archive => handle_archive(&app)?,
        Commands::Workspace { command } => handle_workspace(&app, command).await?,
        Commands::Daemon { max_iterations } => return handle_daemon(&app, max_iterations).await,
    }
    Ok(0)
}

fn engine_params(ctx: &WorkContext, config: &Config, max_iterations: u32) -> LoopParams {
    LoopParams {
        work_dir: ctx.work_dir.clone(),
        prd_path: ctx.prd_path.clone(),
        progress_path: ctx.progress_path.clone(),
        max_iterations,
        quality_checks: config.run.quality_checks.clone(),
    }
}

fn run_id() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

async fn handle_run(app: &App, max_iterations: u32, foreground: bool, detach: bool, tui: bool) -> Result<()> {
    let ctx = app.context()?;
    let prd = prd::load(&ctx.prd_path).map_err(explain)?;
    let run_state = ctx.run_state();
    if let Some(pid) = run_state.running_pid() {
        return Err(explain(RalphError::AlreadyRunning(pid)));
    }
    prune_logs(&ctx.logs_dir)?;

    println!(
        "{} {} in {} ({} of {} stories passing, budget {} iterations)",
        "Running".cyan(),
        prd.project.bold(),
        ctx.display_name(),
        prd.stories_passed(),
        prd.user_stories.len(),
        max_iterations
    );

    if foreground {
        return run_foreground(app, &ctx, max_iterations).await;
    }

    let mut args = vec![OsString::from("--workspace"), OsString::from(ctx.display_name())];
    if let Some(path) = &app.config_path {
        args.push(OsString::from("--config"));
        args.push(path.clone().into_os_string());
    }
    args.push(OsString::from(DAEMON_COMMAND));
    args.push(OsString::from("--max-iterations"));
    args.push(OsString::from(max_iterations.to_string()));

    let pid = DaemonSpawner::current_exe(args)?
        .with_env(WORKSPACE_ENV, ctx.display_name())
        .with_start_timeout(app.config.daemon.start_timeout())
        .spawn(&run_state)
        .await
        .map_err(explain)?;
    println!("{} daemon (PID {})", "Started".green(), pid);

    if detach {
        println!("Follow it with `ralph attach`, stop it with `ralph stop`.");
        return Ok(());
    }
    if tui {
        return dashboard_for(app, vec![ctx]).await;
    }
    follow(app, &ctx).await
}

/// Prints events as they are written.
struct EchoSink {
    writer: EventWriter,
}

impl EventSink for EchoSink {
    fn emit(&self, event: Event) {
        print_event(&event);
        self.writer.emit(event);
    }

    fn begin_iteration(&self, iteration: u32) {
        self.writer.begin_iteration(iteration);
    }
}

async fn run_foreground(app: &App, ctx: &WorkContext, max_iterations: u32) -> Result<()> {
    let sink = Arc::new(EchoSink {
        writer: EventWriter::new(&ctx.logs_dir, run_id())?,
    });
    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone())?;
    let status = host_for(app, ctx, max_iterations, sink)
        .run(cancel)
        .await
        .map_err(explain)?;
    report_status(status.result, status.error.as_deref())
}

fn host_for(app: &App, ctx: &WorkContext, max_iterations: u32, events: Arc<dyn EventSink>) -> DaemonHost {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let agent = Arc::new(CommandAgent::new(app.config.agent.clone()));
    let engine = LoopEngine::new(agent, events.clone(), clock.clone());
    let runner = Arc::new(EngineRunner::new(engine, engine_params(ctx, &app.config, max_iterations)));
    DaemonHost::new(runner, ctx.run_state(), events, clock)
}

/// Entry point of the detached daemon process.
async fn handle_daemon(app: &App, max_iterations: u32) -> Result<i32> {
    detach()?;
    let ctx = app.context()?;
    let events = Arc::new(EventWriter::new(&ctx.logs_dir, run_id())?);
    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone())?;

    let status = host_for(app, &ctx, max_iterations, events).run(cancel).await?;
    info!("Daemon for {} exiting with {}", ctx.display_name(), status.result);
    Ok(0)
}

fn print_event(event: &Event) {
    let line = event.summary();
    match event.payload.result {
        Some(RunResult::Success) => println!("{}", line.green()),
        Some(RunResult::Failed) => println!("{}", line.red()),
        Some(RunResult::Cancelled) => println!("{}", line.yellow()),
        None if event.event_type.ends_with(".failed") => println!("{}", line.red()),
        None => println!("{}", line),
    }
}

fn report_status(result: RunResult, error: Option<&str>) -> Result<()> {
    match result {
        RunResult::Success => {
            println!("{} every story and integration test passes", "Done:".green().bold());
            Ok(())
        }
        RunResult::Cancelled => {
            println!("{}", "Run cancelled".yellow());
            Ok(())
        }
        RunResult::Failed => Err(eyre!("Run failed: {}", error.unwrap_or("unknown error"))),
    }
}

/// Plain-text attach: print events until the daemon exits. Ctrl-C stops the
/// daemon.
async fn follow(app: &App, ctx: &WorkContext) -> Result<()> {
    let run_state = ctx.run_state();
    let mut cursor = EventCursor::new(&ctx.logs_dir);
    let interrupt = interrupt_token();

    let end = tail(&mut cursor, &run_state, StreamTiming::default().poll, &interrupt, print_event).await?;
    match end {
        TailEnd::DaemonExited => match run_state.read_status()? {
            Some(status) => report_status(status.result, status.error.as_deref()),
            None => {
                println!("{}", "Daemon is not running and has no recorded result".dimmed());
                Ok(())
            }
        },
        TailEnd::Interrupted => {
            println!("{}", "Interrupted, stopping daemon...".yellow());
            stop(app, &run_state).await
        }
    }
}

async fn handle_attach(app: &App, tui: bool) -> Result<()> {
    let ctx = app.context()?;
    if tui {
        return dashboard_for(app, vec![ctx]).await;
    }
    if !ctx.run_state().is_running() {
        println!("No daemon running in {}; replaying its last run", ctx.display_name());
    }
    follow(app, &ctx).await
}

async fn stop(app: &App, run_state: &RunState) -> Result<()> {
    match stop_and_wait(run_state, &OsProcess, &app.stop_policy()).await.map_err(explain)? {
        StopOutcome::NotRunning => println!("No daemon running"),
        StopOutcome::Terminated(pid) => println!("{} daemon (PID {})", "Stopped".green(), pid),
        StopOutcome::Killed(pid) => println!("{} daemon (PID {}) after it ignored SIGTERM", "Killed".yellow(), pid),
    }
    Ok(())
}

async fn handle_stop(app: &App) -> Result<()> {
    let ctx = app.context()?;
    stop(app, &ctx.run_state()).await
}

fn status_line(ctx: &WorkContext, branch: &str, missing: bool) -> String {
    let name = format!("{:<16}", ctx.display_name());
    if missing {
        return format!("{} {:<24} {}", name.bold(), branch, "missing".red());
    }

    let state = match ctx.run_state().running_pid() {
        Some(pid) => format!("running (PID {})", pid).green().to_string(),
        None => "idle".dimmed().to_string(),
    };
    let last = match ctx.run_state().read_status() {
        Ok(Some(status)) => format!("last: {}", status.result),
        Ok(None) => "last: -".to_string(),
        Err(e) => format!("last: unreadable ({})", e),
    };
    let progress = match prd::load(&ctx.prd_path) {
        Ok(prd) => format!(
            "stories {}/{} tests {}/{}",
            prd.stories_passed(),
            prd.user_stories.len(),
            prd.tests_passed(),
            prd.integration_tests.len()
        ),
        Err(RalphError::PrdNotFound(_)) => "no PRD".to_string(),
        Err(e) => format!("PRD error: {}", e),
    };
    format!("{} {:<24} {:<28} {:<14} {}", name.bold(), branch, state, last, progress)
}

async fn handle_status(app: &App) -> Result<()> {
    let repo = app.repo()?;
    let base_branch = GitCli::new(repo.root())
        .current_branch()
        .await
        .unwrap_or_else(|_| "-".to_string());
    println!("{}", status_line(&WorkContext::base(repo), &base_branch, false));

    for entry in app.manager()?.registry().list_with_missing().map_err(explain)? {
        let ctx = WorkContext::workspace(repo, &entry.workspace.name);
        println!("{}", status_line(&ctx, &entry.workspace.branch, entry.missing));
    }
    Ok(())
}

async fn handle_check(app: &App, argv: &[String]) -> Result<i32> {
    let cwd = std::env::current_dir()?;
    let logs = resolve_logs_dir(&cwd);
    let report = GateRunner::from(&app.config.gate)
        .run(argv, &cwd, &logs)
        .await
        .map_err(explain)?;

    if report.passed {
        println!("{}", report.summary().green());
        Ok(0)
    } else {
        println!("{}", report.summary().red());
        Ok(if report.exit_code == 0 { 1 } else { report.exit_code })
    }
}

async fn dashboard_for(app: &App, contexts: Vec<WorkContext>) -> Result<()> {
    let targets = contexts
        .into_iter()
        .map(|ctx| {
            let target = WatchTarget {
                logs_dir: ctx.logs_dir.clone(),
                run_state: ctx.run_state(),
            };
            (ctx.display_name().to_string(), target)
        })
        .collect();
    run_dashboard(targets, &app.config.tui).await
}

async fn handle_dashboard(app: &App) -> Result<()> {
    let repo = app.repo()?;
    let mut contexts = vec![WorkContext::base(repo)];
    for entry in app.manager()?.registry().list_with_missing().map_err(explain)? {
        if entry.missing {
            warn!("Skipping missing workspace {}", entry.workspace.name);
            continue;
        }
        contexts.push(WorkContext::workspace(repo, &entry.workspace.name));
    }
    dashboard_for(app, contexts).await
}

async fn handle_rebase(app: &App, onto: Option<String>, max_turns: Option<u32>, interactive: bool) -> Result<()> {
    let ctx = app.context()?;
    if let Some(pid) = ctx.run_state().running_pid() {
        return Err(explain(RalphError::AlreadyRunning(pid)));
    }

    let request = RebaseRequest {
        onto: onto.unwrap_or_else(|| app.config.workspace.base_branch.clone()),
        work_dir: ctx.work_dir.clone(),
        prd_path: ctx.prd_path.clone(),
        progress_path: ctx.progress_path.clone(),
        max_turns: max_turns.unwrap_or(app.config.agent.rebase_max_turns),
        interaction: if interactive {
            Interaction::Interactive
        } else {
            Interaction::Headless
        },
    };
    println!("{} {} onto {}", "Rebasing".cyan(), ctx.display_name(), request.onto);

    let resolver = RebaseResolver::new(
        Arc::new(GitCli::new(&ctx.work_dir)),
        Arc::new(CommandAgent::new(app.config.agent.clone())),
    );
    let report = resolver.run(&request).await.map_err(explain)?;
    match report.state {
        RebaseState::Done => {
            println!("{} rebased onto {} ({} agent round(s))", "Done:".green(), request.onto, report.rounds);
            Ok(())
        }
        _ => bail!("Rebase onto {} was aborted; the branch is unchanged", request.onto),
    }
}

fn handle_archive(app: &App) -> Result<()> {
    let repo = app.repo()?;
    let ctx = app.context()?;
    if let Some(pid) = ctx.run_state().running_pid() {
        return Err(explain(RalphError::AlreadyRunning(pid)));
    }
    let dir = prd::archive(&ctx.prd_path, &ctx.progress_path, &repo.archive_dir(), Local::now().date_naive())
        .map_err(explain)?;
    println!("{} {}", "Archived to".green(), dir.display());
    Ok(())
}

async fn handle_workspace(app: &App, command: WorkspaceCommands) -> Result<()> {
    let manager = app.manager()?;
    match command {
        WorkspaceCommands::Create { name, branch, base, copy } => {
            let base = base.unwrap_or_else(|| app.config.workspace.base_branch.clone());
            let mut patterns = app.config.workspace.copy.clone();
            patterns.extend(copy);
            let ws = manager
                .create(&name, branch.as_deref(), &base, &patterns)
                .await
                .map_err(explain)?;
            let tree = manager.paths().workspace(&ws.name).tree();
            println!("{} workspace {} on branch {}", "Created".green(), ws.name.bold(), ws.branch);
            println!("  tree: {}", tree.display());
            println!("  next: write its PRD, then `ralph --workspace {} run`", ws.name);
        }
        WorkspaceCommands::Remove { name } => {
            manager.remove(&name).await.map_err(explain)?;
            println!("{} workspace {}", "Removed".green(), name);
        }
        WorkspaceCommands::List => {
            let current = app.context().ok().and_then(|c| c.name);
            let entries = manager.registry().list_with_missing().map_err(explain)?;
            if entries.is_empty() {
                println!("No workspaces. Create one with `ralph workspace create <name>`.");
            }
            for entry in entries {
                let ws = &entry.workspace;
                let marker = if current.as_deref() == Some(ws.name.as_str()) { "*" } else { " " };
                let state = if entry.missing { "missing".red().to_string() } else { String::new() };
                println!(
                    "{} {:<16} {:<24} {} {}",
                    marker,
                    ws.name.bold(),
                    ws.branch,
                    ws.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    state
                );
            }
        }
        WorkspaceCommands::Switch { name } => {
            let repo = app.repo()?;
            let ctx = if name == BASE_CONTEXT {
                WorkContext::base(repo)
            } else {
                manager.registry().get(&name).map_err(explain)?;
                WorkContext::workspace(repo, &name)
            };
            if std::env::var_os(SHELL_INTEGRATION_ENV).is_none() {
                bail!(
                    "`workspace switch` needs the shell integration to change directory ({} is not set).\n  {} cd {}",
                    SHELL_INTEGRATION_ENV,
                    "hint:".yellow(),
                    ctx.work_dir.display()
                );
            }
            // The shell function cds into whatever is printed
            println!("{}", ctx.work_dir.display());
        }
        WorkspaceCommands::Merge { name, into } => {
            let name = match name {
                Some(name) => name,
                None => app
                    .context()?
                    .name
                    .ok_or_else(|| eyre!("Not in a workspace; name the workspace to merge"))?,
            };
            let ws_ctx = WorkContext::workspace(app.repo()?, &name);
            if let Some(pid) = ws_ctx.run_state().running_pid() {
                return Err(explain(RalphError::AlreadyRunning(pid)));
            }
            let into = into.unwrap_or_else(|| app.config.workspace.base_branch.clone());
            let ws = manager.merge(&name, &into).await.map_err(|e| match e {
                RalphError::Vcs { .. } => eyre!(
                    "{}\n  {} run `ralph --workspace {} rebase --onto {}` first",
                    e,
                    "hint:".yellow(),
                    name,
                    into
                ),
                other => explain(other),
            })?;
            println!("{} {} into {}", "Merged".green(), ws.branch, into);
            println!("  remove it with `ralph workspace remove {}`", ws.name);
        }
    }
    Ok(())
}

/// Log file for the current process: the daemon logs next to its events.
pub fn log_file(cli: &Cli, repo: Option<&RepoPaths>) -> Result<PathBuf> {
    if let Commands::Daemon { .. } = cli.command
        && let Some(repo) = repo
    {
        let ctx = WorkContext::from_env(repo, cli.workspace.as_deref()).map_err(explain)?;
        return Ok(ctx.logs_dir.join("daemon.log"));
    }
    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ralph")
        .join("logs");
    Ok(dir.join("ralph.log"))
}
