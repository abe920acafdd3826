//! Capability calls as the engine makes them: each one bounded by its
//! start-to-close timeout and retried per the policy. Best-effort calls
//! (estimate, notify, metrics, restore) log failures instead of returning
//! them.

use std::path::Path;
use std::time::Duration;
use tracing::{error, warn};

use super::RetryPolicy;
use crate::capability::{
    Capabilities, Complexity, CostEstimate, ExecutionRequest, ExecutionResult, MetricsRecord, Notification,
    SnapshotId, ValidationResult,
};
use crate::config::{EngineConfig, TimeoutSettings};
use crate::errors::WorkflowError;

#[derive(Clone)]
pub struct Activities {
    caps: Capabilities,
    retry: RetryPolicy,
    timeouts: TimeoutSettings,
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

impl Activities {
    pub fn new(caps: Capabilities, config: &EngineConfig) -> Self {
        Self {
            caps,
            retry: config.retry_policy(),
            timeouts: config.timeouts.clone(),
        }
    }

    pub async fn estimate(&self, prompt: &str, complexity: Complexity) -> Option<CostEstimate> {
        let estimator = &self.caps.estimator;
        let outcome = self
            .retry
            .run("estimate", secs(self.timeouts.estimate_secs), || {
                estimator.estimate(prompt, complexity)
            })
            .await;

        match outcome {
            Ok(estimate) => Some(estimate),
            Err(e) => {
                warn!("Cost estimate unavailable: {}", e);
                None
            }
        }
    }

    pub async fn snapshot(&self, stage: &str, workspace: &Path) -> Result<SnapshotId, WorkflowError> {
        let ws = &self.caps.workspace;
        self.retry
            .run("snapshot", secs(self.timeouts.snapshot_secs), || ws.snapshot(workspace))
            .await
            .map_err(|source| WorkflowError::Capability {
                stage: stage.to_string(),
                source,
            })
    }

    /// True only when the restore ran and took effect.
    pub async fn restore(&self, workspace: &Path, snapshot: &SnapshotId) -> bool {
        let ws = &self.caps.workspace;
        let outcome = self
            .retry
            .run("restore", secs(self.timeouts.snapshot_secs), || {
                ws.restore(workspace, snapshot)
            })
            .await;

        match outcome {
            Ok(restored) => restored,
            Err(e) => {
                error!(snapshot = %snapshot, "Rollback failed: {}", e);
                false
            }
        }
    }

    pub async fn execute(&self, stage: &str, request: &ExecutionRequest) -> Result<ExecutionResult, WorkflowError> {
        let executor = &self.caps.executor;
        self.retry
            .run("execute", secs(self.timeouts.execute_secs), || executor.execute(request))
            .await
            .map_err(|source| WorkflowError::Capability {
                stage: stage.to_string(),
                source,
            })
    }

    pub async fn validate(&self, stage: &str, workspace: &Path) -> Result<ValidationResult, WorkflowError> {
        let validator = &self.caps.validator;
        self.retry
            .run("validate", secs(self.timeouts.validate_secs), || validator.run(workspace))
            .await
            .map_err(|source| WorkflowError::Capability {
                stage: stage.to_string(),
                source,
            })
    }

    pub async fn notify(&self, notification: &Notification) -> bool {
        let notifier = &self.caps.notifier;
        let outcome = self
            .retry
            .run("notify", secs(self.timeouts.notify_secs), || notifier.send(notification))
            .await;

        match outcome {
            Ok(true) => true,
            Ok(false) => {
                warn!(notifier = %self.caps.notifier.name(), "Notification was not delivered");
                false
            }
            Err(e) => {
                warn!(notifier = %self.caps.notifier.name(), "Notification failed: {}", e);
                false
            }
        }
    }

    pub async fn record(&self, record: &MetricsRecord) {
        let sink = &self.caps.metrics;
        let outcome = self
            .retry
            .run("metrics", secs(self.timeouts.metrics_secs), || sink.record(record))
            .await;

        if let Err(e) = outcome {
            warn!(stage = %record.stage, "Failed to record metrics: {}", e);
        }
    }
}
