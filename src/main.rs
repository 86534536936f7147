use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info};
use std::fs;
use std::path::Path;

use ralph::config::Config;
use ralph::paths::RepoPaths;

mod cli;

use cli::{App, Cli};

fn setup_logging(log_file: &Path, level: LevelFilter) -> Result<()> {
    if let Some(dir) = log_file.parent() {
        fs::create_dir_all(dir).context("Failed to create log directory")?;
    }

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn log_level(cli: &Cli, config: &Config) -> LevelFilter {
    if cli.is_verbose() {
        return LevelFilter::Debug;
    }
    config
        .log_level
        .as_deref()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let repo = RepoPaths::discover(&cwd);

    // Load configuration
    let config_file = repo.as_ref().map(|r| r.config_file());
    let config = Config::load(cli.config.as_ref(), config_file.as_deref()).context("Failed to load configuration")?;

    let log_file = cli::handlers::log_file(&cli, repo.as_ref())?;
    setup_logging(&log_file, log_level(&cli, &config)).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    if cli.is_verbose() {
        eprintln!("{} {}", "Logging to".dimmed(), log_file.display());
    }

    let app = App {
        workspace: cli.workspace.clone(),
        config_path: cli.config.clone(),
        config,
        repo,
    };

    let code = cli::dispatch(cli, app).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
