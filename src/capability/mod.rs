//! External capabilities consumed by the engine.
//!
//! Each capability is a narrow async trait so the engine can run against
//! real adapters or test doubles alike:
//!
//! | Trait                | Real implementation              |
//! |----------------------|----------------------------------|
//! | `Executor`           | `claude::ClaudeExecutor`         |
//! | `Validator`          | `validator::CommandValidator`    |
//! | `VersionedWorkspace` | `git::GitWorkspace`              |
//! | `CostEstimator`      | `cost::HeuristicCostEstimator`   |
//! | `Notifier`           | `notify::*`                      |
//! | `MetricsSink`        | `metrics::JsonlMetricsSink`      |
//!
//! Every call must be safe to repeat with identical input.

pub mod claude;
pub mod cost;
pub mod git;
pub mod metrics;
pub mod notify;
pub mod validator;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::errors::CapabilityError;

/// Input for a single agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub prompt: String,
    pub workspace: PathBuf,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Telemetry returned by one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub duration_ms: u64,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub lines_added: u64,
    #[serde(default)]
    pub lines_removed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_url: Option<String>,
}

/// Outcome of one test-suite run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

impl ValidationResult {
    /// A failed run that never got as far as executing tests.
    pub fn unavailable(reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            total_tests: 0,
            passed: 0,
            failed: 1,
            duration_ms,
            errors: vec![reason.into()],
            coverage: None,
        }
    }
}

/// Rough size of the work a prompt is expected to trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Completion tokens per prompt token.
    pub fn multiplier(self) -> u64 {
        match self {
            Complexity::Low => 2,
            Complexity::Medium => 4,
            Complexity::High => 8,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub estimated_cost: f64,
    pub model: String,
    pub token_estimate: u64,
}

/// Opaque handle to a workspace checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message sent to a developer when a stage needs review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub stage: String,
    pub message: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_url: Option<String>,
}

/// One observability record per stage, iteration or feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub stage: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub duration_ms: u64,
    pub files_modified: usize,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub tests_pass: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricsRecord {
    /// Record built from an execution result.
    pub fn from_execution(stage: impl Into<String>, result: &ExecutionResult, tests_pass: bool) -> Self {
        Self {
            stage: stage.into(),
            tokens_used: result.tokens_used,
            cost: result.cost,
            duration_ms: result.duration_ms,
            files_modified: result.files_modified.len(),
            lines_added: result.lines_added,
            lines_removed: result.lines_removed,
            tests_pass,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Zeroed record carrying only the error that aborted a run.
    pub fn failure(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            tokens_used: 0,
            cost: 0.0,
            duration_ms: 0,
            files_modified: 0,
            lines_added: 0,
            lines_removed: 0,
            tests_pass: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, CapabilityError>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn run(&self, workspace: &Path) -> Result<ValidationResult, CapabilityError>;
}

#[async_trait]
pub trait VersionedWorkspace: Send + Sync {
    async fn snapshot(&self, workspace: &Path) -> Result<SnapshotId, CapabilityError>;

    /// Returns `Ok(false)` when the restore ran but did not take effect.
    async fn restore(&self, workspace: &Path, snapshot: &SnapshotId) -> Result<bool, CapabilityError>;
}

#[async_trait]
pub trait CostEstimator: Send + Sync {
    async fn estimate(&self, prompt: &str, complexity: Complexity) -> Result<CostEstimate, CapabilityError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort delivery; `Ok(false)` means the backend declined.
    async fn send(&self, notification: &Notification) -> Result<bool, CapabilityError>;

    fn name(&self) -> String;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, record: &MetricsRecord) -> Result<(), CapabilityError>;
}

/// The full set of adapters a run needs.
#[derive(Clone)]
pub struct Capabilities {
    pub executor: Arc<dyn Executor>,
    pub validator: Arc<dyn Validator>,
    pub workspace: Arc<dyn VersionedWorkspace>,
    pub estimator: Arc<dyn CostEstimator>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Capabilities {
    /// Build the production adapters selected by `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let executor = config.executor();
        Ok(Self {
            estimator: Arc::new(cost::HeuristicCostEstimator::new(&executor.model)),
            executor: Arc::new(claude::ClaudeExecutor::new(executor)),
            validator: Arc::new(validator::CommandValidator::new(config.validator.test_framework()?)),
            workspace: Arc::new(git::GitWorkspace::new()),
            notifier: notify::build_notifier(&config.notification)?,
            metrics: Arc::new(metrics::JsonlMetricsSink::new(config.metrics.file.clone())),
        })
    }
}

/// Fail fast when the workspace path is gone.
pub(crate) fn ensure_workspace(path: &Path) -> Result<(), CapabilityError> {
    if path.exists() {
        Ok(())
    } else {
        Err(CapabilityError::Workspace(format!(
            "Path does not exist: {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_multipliers() {
        assert_eq!(Complexity::Low.multiplier(), 2);
        assert_eq!(Complexity::Medium.multiplier(), 4);
        assert_eq!(Complexity::High.multiplier(), 8);
        assert_eq!(Complexity::High.to_string(), "high");
    }

    #[test]
    fn metrics_record_from_execution_counts_files() {
        let result = ExecutionResult {
            output: "done".into(),
            tokens_used: 1200,
            cost: 0.01,
            duration_ms: 40,
            files_modified: vec!["a.rs".into(), "b.rs".into()],
            lines_added: 10,
            lines_removed: 2,
            diff_url: None,
        };
        let record = MetricsRecord::from_execution("scaffold", &result, true);
        assert_eq!(record.files_modified, 2);
        assert_eq!(record.tokens_used, 1200);
        assert!(record.tests_pass);
        assert!(record.error.is_none());
    }

    #[test]
    fn failure_record_is_zeroed() {
        let record = MetricsRecord::failure("testing", "boom");
        assert_eq!(record.tokens_used, 0);
        assert!(!record.tests_pass);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn ensure_workspace_rejects_missing_path() {
        let err = ensure_workspace(Path::new("/definitely/not/here")).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Path does not exist"));
    }

    #[test]
    fn unavailable_validation_is_a_failure() {
        let result = ValidationResult::unavailable("npm not found", 3);
        assert!(!result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors, vec!["npm not found".to_string()]);
    }
}
