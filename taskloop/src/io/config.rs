//! Orchestrator configuration: optional TOML file overlaid by environment variables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHAT_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";

/// Orchestrator configuration (TOML).
///
/// Missing fields default to the values used by the reference deployment.
/// Secrets are normally supplied through the environment rather than the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Project the agents work in. Relative paths resolve against the working directory.
    pub project_root: PathBuf,

    /// Task list location. Defaults to `task_list.json` under the project root.
    pub task_file: Option<PathBuf>,

    /// Maximum number of test attempts per task.
    pub max_retries: u32,

    /// Shell command whose exit status decides whether a task is done.
    pub test_command: String,

    /// Upper bound for each tool output embedded into a prompt.
    pub prompt_output_budget_bytes: usize,

    pub planner: ChatAgentConfig,
    pub debugger: ChatAgentConfig,
    pub executor: ExecutorConfig,
}

/// Chat-completion endpoint used by the planner or the debugger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatAgentConfig {
    pub api_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ChatAgentConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_CHAT_API_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl ChatAgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Coding CLI used for execution; the prompt is written to its stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program and arguments (e.g. `["claude", "-p", "--dangerously-skip-permissions"]`).
    pub command: Vec<String>,
    /// Timeout for both agent runs and shell commands.
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            timeout_secs: 600,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from(".."),
            task_file: None,
            max_retries: 5,
            test_command: "cd backend && go build ./...".to_string(),
            prompt_output_budget_bytes: 20_000,
            planner: ChatAgentConfig::default(),
            debugger: ChatAgentConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.test_command.trim().is_empty() {
            return Err(anyhow!("test_command must not be empty"));
        }
        if self.prompt_output_budget_bytes == 0 {
            return Err(anyhow!("prompt_output_budget_bytes must be > 0"));
        }
        if self.planner.timeout_secs == 0 || self.debugger.timeout_secs == 0 {
            return Err(anyhow!("agent timeout_secs must be > 0"));
        }
        if self.executor.timeout_secs == 0 {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        Ok(())
    }

    /// Fail unless the planner has an API key. The debugger falls back to the
    /// planner key when it has none of its own.
    pub fn require_credentials(&mut self) -> Result<()> {
        let planner_key = self
            .planner
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("PLANNER_API_KEY (or ENGINE_API_KEY) is required"))?;
        if self
            .debugger
            .api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
        {
            self.debugger.api_key = Some(planner_key);
        }
        Ok(())
    }

    /// Task list location as configured; relative paths are resolved against
    /// the project root by [`crate::io::project::discover`].
    pub fn task_file(&self) -> &Path {
        self.task_file
            .as_deref()
            .unwrap_or_else(|| Path::new("task_list.json"))
    }

    /// Overlay values from environment variables (non-empty values only).
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        let get = |key: &str| vars.get(key).filter(|value| !value.is_empty()).cloned();

        if let Some(value) = get("PROJECT_ROOT") {
            self.project_root = PathBuf::from(value);
        }
        if let Some(value) = get("TASK_FILE") {
            self.task_file = Some(PathBuf::from(value));
        }
        if let Some(value) = get("TEST_COMMAND") {
            self.test_command = value;
        }
        if let Some(value) = get("MAX_RETRIES") {
            self.max_retries = value
                .parse()
                .with_context(|| format!("parse MAX_RETRIES '{value}'"))?;
        }
        // ENGINE_* is the older name of the planner variables; PLANNER_* wins.
        apply_agent_env(&mut self.planner, "ENGINE", &get);
        apply_agent_env(&mut self.planner, "PLANNER", &get);
        apply_agent_env(&mut self.debugger, "DEBUGGER", &get);
        Ok(())
    }
}

fn apply_agent_env(
    agent: &mut ChatAgentConfig,
    prefix: &str,
    get: &dyn Fn(&str) -> Option<String>,
) {
    if let Some(value) = get(&format!("{prefix}_API_KEY")) {
        agent.api_key = Some(value);
    }
    if let Some(value) = get(&format!("{prefix}_API_URL")) {
        agent.api_url = value;
    }
    if let Some(value) = get(&format!("{prefix}_MODEL")) {
        agent.model = value;
    }
}

/// Load config from an optional TOML file, then overlay the process environment.
///
/// A missing `path` (or `None`) yields `OrchestratorConfig::default()` before the overlay.
pub fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let mut cfg = read_config_file(path)?;
    let vars: HashMap<String, String> = std::env::vars().collect();
    cfg.apply_env(&vars)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the TOML file at `path`, or return defaults when there is none.
fn read_config_file(path: Option<&Path>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) if path.exists() => {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
        }
        _ => Ok(OrchestratorConfig::default()),
    }
}
