//! Engine configuration.
//!
//! Settings are read from `.devflow/devflow.toml` and layered:
//! defaults → file → environment (`.env` is loaded first) → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! environment = "staging"
//!
//! [executor]
//! command = "claude"
//! model = "claude-sonnet-4-5"
//!
//! [retry]
//! initial_interval_secs = 2
//! backoff_coefficient = 2.0
//! max_attempts = 3
//! max_interval_secs = 60
//!
//! [rate_limit]
//! max_tokens_before_cooldown = 50000
//! cooldown_secs = 30
//!
//! [validator]
//! framework = "cargo"
//!
//! [notification]
//! channels = ["console", "slack"]
//! slack_webhook_url = "https://hooks.slack.com/services/..."
//!
//! [workflow]
//! template = "api"
//! skip_stages = ["authentication"]
//! ```
//!
//! The engine never reads a global: an `EngineConfig` value is handed to
//! each orchestrator, refiner and developer when it is built.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::validator::TestFramework;
use crate::engine::RetryPolicy;

/// Name of the per-project state directory.
pub const DEVFLOW_DIR: &str = ".devflow";

/// Deployment profile. Selects executor defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!(
                "Invalid environment '{}'. Valid values: development, staging, production",
                s
            ),
        }
    }
}

/// Resolved agent executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    pub command: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl ExecutorSettings {
    /// Profile defaults before any override is applied.
    pub fn for_environment(environment: Environment) -> Self {
        let (max_tokens, temperature, timeout_secs) = match environment {
            Environment::Production => (8000, 0.2, 600),
            Environment::Staging => (8000, 0.3, 600),
            Environment::Development => (100_000, 0.3, 1800),
        };
        Self {
            command: "claude".to_string(),
            model: crate::capability::cost::DEFAULT_MODEL.to_string(),
            max_tokens,
            temperature,
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[executor]` as written in the file; unset fields come from the profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_interval_secs")]
    pub initial_interval_secs: u64,
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
}

fn default_initial_interval_secs() -> u64 {
    2
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_interval_secs() -> u64 {
    60
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval_secs: default_initial_interval_secs(),
            backoff_coefficient: default_backoff_coefficient(),
            max_attempts: default_max_attempts(),
            max_interval_secs: default_max_interval_secs(),
        }
    }
}

/// Start-to-close timeouts per capability call, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_short_timeout")]
    pub estimate_secs: u64,
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_secs: u64,
    #[serde(default = "default_long_timeout")]
    pub execute_secs: u64,
    #[serde(default = "default_long_timeout")]
    pub validate_secs: u64,
    #[serde(default = "default_short_timeout")]
    pub notify_secs: u64,
    #[serde(default = "default_short_timeout")]
    pub metrics_secs: u64,
}

fn default_short_timeout() -> u64 {
    60
}

fn default_snapshot_timeout() -> u64 {
    120
}

fn default_long_timeout() -> u64 {
    600
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            estimate_secs: default_short_timeout(),
            snapshot_secs: default_snapshot_timeout(),
            execute_secs: default_long_timeout(),
            validate_secs: default_long_timeout(),
            notify_secs: default_short_timeout(),
            metrics_secs: default_short_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_tokens_before_cooldown")]
    pub max_tokens_before_cooldown: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_max_tokens_before_cooldown() -> u64 {
    50_000
}

fn default_cooldown_secs() -> u64 {
    30
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_tokens_before_cooldown: default_max_tokens_before_cooldown(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSettings {
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_approval_timeout_secs() -> u64 {
    3600
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinerSettings {
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_refiner_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_iterations() -> u32 {
    5
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    30
}

fn default_refiner_max_tokens() -> u32 {
    4000
}

fn default_temperature() -> f32 {
    0.3
}

impl Default for RefinerSettings {
    fn default() -> Self {
        Self {
            default_max_iterations: default_max_iterations(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            max_tokens: default_refiner_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelSettings {
    #[serde(default = "default_branch_max_tokens")]
    pub branch_max_tokens: u32,
    #[serde(default = "default_branch_temperature")]
    pub branch_temperature: f32,
    #[serde(default = "default_feature_max_tokens")]
    pub feature_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub feature_temperature: f32,
}

fn default_branch_max_tokens() -> u32 {
    100
}

fn default_branch_temperature() -> f32 {
    0.1
}

fn default_feature_max_tokens() -> u32 {
    6000
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            branch_max_tokens: default_branch_max_tokens(),
            branch_temperature: default_branch_temperature(),
            feature_max_tokens: default_feature_max_tokens(),
            feature_temperature: default_temperature(),
        }
    }
}

/// Test framework selection. Chosen explicitly, never sniffed from the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkKind {
    #[default]
    Cargo,
    Npm,
    Pytest,
    Go,
    Command,
}

impl std::str::FromStr for FrameworkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cargo" => Ok(FrameworkKind::Cargo),
            "npm" => Ok(FrameworkKind::Npm),
            "pytest" => Ok(FrameworkKind::Pytest),
            "go" => Ok(FrameworkKind::Go),
            "command" => Ok(FrameworkKind::Command),
            _ => anyhow::bail!(
                "Invalid test framework '{}'. Valid values: cargo, npm, pytest, go, command",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSettings {
    #[serde(default)]
    pub framework: FrameworkKind,
    /// Shell command, required when `framework = "command"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ValidatorSettings {
    pub fn test_framework(&self) -> Result<TestFramework> {
        Ok(match self.framework {
            FrameworkKind::Cargo => TestFramework::Cargo,
            FrameworkKind::Npm => TestFramework::Npm,
            FrameworkKind::Pytest => TestFramework::Pytest,
            FrameworkKind::Go => TestFramework::Go,
            FrameworkKind::Command => {
                let command = self
                    .command
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .context("validator.framework = \"command\" requires validator.command")?;
                TestFramework::Command(command)
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Console,
    Logging,
    Slack,
    Webhook,
}

impl std::str::FromStr for NotifierKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" => Ok(NotifierKind::Console),
            "logging" => Ok(NotifierKind::Logging),
            "slack" => Ok(NotifierKind::Slack),
            "webhook" => Ok(NotifierKind::Webhook),
            _ => anyhow::bail!(
                "Invalid notifier '{}'. Valid values: console, logging, slack, webhook",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_channels")]
    pub channels: Vec<NotifierKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_channel: Option<String>,
    #[serde(default = "default_slack_username")]
    pub slack_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub webhook_headers: HashMap<String, String>,
}

fn default_channels() -> Vec<NotifierKind> {
    vec![NotifierKind::Console]
}

fn default_slack_username() -> String {
    "devflow".to_string()
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            slack_webhook_url: None,
            slack_channel: None,
            slack_username: default_slack_username(),
            webhook_url: None,
            webhook_headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_metrics_file")]
    pub file: PathBuf,
}

fn default_metrics_file() -> PathBuf {
    PathBuf::from(DEVFLOW_DIR).join("metrics.jsonl")
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            file: default_metrics_file(),
        }
    }
}

/// Which stage pipeline `devflow run` drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub skip_stages: Vec<String>,
    #[serde(default)]
    pub custom_prompts: HashMap<String, String>,
    /// JSON file with an explicit stage list; wins over `template`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages_file: Option<PathBuf>,
}

fn default_template() -> String {
    "llm-wrapper".to_string()
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            template: default_template(),
            skip_stages: Vec::new(),
            custom_prompts: HashMap::new(),
            stages_file: None,
        }
    }
}

/// The complete devflow.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub approval: ApprovalSettings,
    #[serde(default)]
    pub refiner: RefinerSettings,
    #[serde(default)]
    pub parallel: ParallelSettings,
    #[serde(default)]
    pub validator: ValidatorSettings,
    #[serde(default)]
    pub notification: NotificationSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub workflow: WorkflowSettings,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse devflow.toml")
    }

    /// Load `devflow.toml` from `devflow_dir`, or defaults when absent.
    pub fn load_or_default(devflow_dir: &Path) -> Result<Self> {
        let config_path = devflow_dir.join("devflow.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Full layering for a project: `.env`, file, process environment.
    /// Relative paths are anchored at `project_dir`.
    pub fn resolve(project_dir: &Path) -> Result<Self> {
        dotenvy::from_path(project_dir.join(".env")).ok();

        let mut config = Self::load_or_default(&project_dir.join(DEVFLOW_DIR))?;
        config.apply_overrides(|key| std::env::var(key).ok());

        if config.metrics.file.is_relative() {
            config.metrics.file = project_dir.join(&config.metrics.file);
        }
        if let Some(ref stages_file) = config.workflow.stages_file
            && stages_file.is_relative()
        {
            config.workflow.stages_file = Some(project_dir.join(stages_file));
        }
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize devflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Numeric values that fail to parse leave the current setting alone.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("DEVFLOW_ENV") {
            self.environment = env.parse().unwrap_or_default();
        }
        if let Some(cmd) = lookup("CLAUDE_CMD") {
            self.executor.command = Some(cmd);
        }
        if let Some(tokens) = lookup("EXECUTOR_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.executor.max_tokens = Some(tokens);
        }
        if let Some(temp) = lookup("EXECUTOR_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.executor.temperature = Some(temp);
        }
        if let Some(timeout) = lookup("EXECUTOR_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.executor.timeout_secs = Some(timeout);
        }
        if let Some(kind) = lookup("NOTIFICATION_TYPE").and_then(|v| v.parse().ok()) {
            self.notification.channels = vec![kind];
        }
        if let Some(url) = lookup("SLACK_WEBHOOK_URL") {
            self.notification.slack_webhook_url = Some(url);
        }
        if let Some(channel) = lookup("SLACK_CHANNEL") {
            self.notification.slack_channel = Some(channel);
        }
        if let Some(url) = lookup("NOTIFICATION_WEBHOOK_URL") {
            self.notification.webhook_url = Some(url);
        }
        if let Some(file) = lookup("METRICS_FILE") {
            self.metrics.file = PathBuf::from(file);
        }
    }

    /// Executor settings after applying the environment profile.
    pub fn executor(&self) -> ExecutorSettings {
        let base = ExecutorSettings::for_environment(self.environment);
        ExecutorSettings {
            command: self.executor.command.clone().unwrap_or(base.command),
            model: self.executor.model.clone().unwrap_or(base.model),
            max_tokens: self.executor.max_tokens.unwrap_or(base.max_tokens),
            temperature: self.executor.temperature.unwrap_or(base.temperature),
            timeout_secs: self.executor.timeout_secs.unwrap_or(base.timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_secs(self.retry.initial_interval_secs),
            backoff_coefficient: self.retry.backoff_coefficient,
            max_attempts: self.retry.max_attempts,
            max_interval: Duration::from_secs(self.retry.max_interval_secs),
        }
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit.cooldown_secs)
    }

    /// Human-readable problems that do not stop loading but will bite later.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; treated as a single attempt with no retries".to_string());
        }
        if self.retry.backoff_coefficient < 1.0 {
            warnings.push(format!(
                "retry.backoff_coefficient {} shrinks the delay between attempts",
                self.retry.backoff_coefficient
            ));
        }
        if self.refiner.backoff_base_secs > self.refiner.backoff_max_secs {
            warnings.push("refiner.backoff_base_secs exceeds refiner.backoff_max_secs".to_string());
        }
        for channel in &self.notification.channels {
            match channel {
                NotifierKind::Slack if self.notification.slack_webhook_url.is_none() => {
                    warnings.push("slack notifications enabled without slack_webhook_url".to_string());
                }
                NotifierKind::Webhook if self.notification.webhook_url.is_none() => {
                    warnings.push("webhook notifications enabled without webhook_url".to_string());
                }
                _ => {}
            }
        }
        if let Err(e) = self.validator.test_framework() {
            warnings.push(e.to_string());
        }

        warnings
    }
}
