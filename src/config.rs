use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub agent: AgentConfig,
    #[serde(rename = "loop")]
    pub run: LoopConfig,
    pub gate: GateConfig,
    pub workspace: WorkspaceConfig,
    pub daemon: DaemonConfig,
    pub tui: TuiConfig,
}

/// How to launch the coding agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Flag preceding the prompt in non-interactive mode
    pub print_flag: String,
    /// Flag preceding the turn cap, if the agent supports one
    pub max_turns_flag: Option<String>,
    pub rebase_max_turns: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--dangerously-skip-permissions".to_string()],
            print_flag: "-p".to_string(),
            max_turns_flag: Some("--max-turns".to_string()),
            rebase_max_turns: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    /// Shell commands the agent must pass before marking a story done
    pub quality_checks: Vec<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            quality_checks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub tail_lines: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tail_lines: 20,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub base_branch: String,
    pub remote: String,
    pub branch_prefix: String,
    /// Extra glob patterns copied into every new work tree (e.g. `.env`)
    pub copy: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            remote: "origin".to_string(),
            branch_prefix: "ralph/".to_string(),
            copy: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub start_timeout_ms: u64,
    pub stop_poll_ms: u64,
    pub stop_timeout_secs: u64,
    pub kill_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: 5000,
            stop_poll_ms: 200,
            stop_timeout_secs: 30,
            kill_timeout_secs: 5,
        }
    }
}

impl DaemonConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuiConfig {
    pub tick_rate_ms: u64,
    /// Messages kept per workspace panel
    pub history: usize,
}

impl Default for TuiConfig {
    fn default() -> Self {
        Self {
            tick_rate_ms: 250,
            history: 200,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            agent: AgentConfig::default(),
            run: LoopConfig::default(),
            gate: GateConfig::default(),
            workspace: WorkspaceConfig::default(),
            daemon: DaemonConfig::default(),
            tui: TuiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// explicit path, `<repo>/.ralph/config.yml`, `~/.config/ralph/ralph.yml`,
    /// `./ralph.yml`, defaults.
    pub fn load(config_path: Option<&PathBuf>, repo_config: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = repo_config {
            candidates.push(path.to_path_buf());
        }
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(project_name).join(format!("{}.yml", project_name)));
        }
        candidates.push(PathBuf::from(format!("{}.yml", project_name)));

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", candidate.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
