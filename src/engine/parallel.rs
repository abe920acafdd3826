use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info};

use super::activities::Activities;
use crate::capability::{Capabilities, ExecutionRequest, MetricsRecord, ValidationResult};
use crate::config::{EngineConfig, ParallelSettings};
use crate::errors::WorkflowError;
use crate::state::WorkflowState;

/// Result of developing one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureResult {
    pub feature: String,
    pub branch: String,
    pub success: bool,
    pub tokens_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

/// `feature-{index}-{slug}`, slug being the lowercased name with spaces
/// replaced by dashes.
pub fn branch_name(index: usize, feature: &str) -> String {
    format!("feature-{}-{}", index, feature.replace(' ', "-").to_lowercase())
}

/// Develops independent features concurrently.
pub struct ParallelDeveloper {
    activities: Activities,
    settings: ParallelSettings,
    state_tx: watch::Sender<WorkflowState>,
}

impl ParallelDeveloper {
    pub fn new(caps: Capabilities, config: &EngineConfig) -> Self {
        let (state_tx, _) = watch::channel(WorkflowState::new());
        Self {
            activities: Activities::new(caps, config),
            settings: config.parallel.clone(),
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state_tx.subscribe()
    }

    /// Spawn one task per feature and join them all. Failed or panicked
    /// tasks are logged and left out; results keep input order.
    pub async fn run(&self, workspace: &Path, features: &[String]) -> Vec<FeatureResult> {
        let mut initial = WorkflowState::new();
        initial.enter("parallel-development");
        self.state_tx.send_replace(initial);

        info!(features = features.len(), "Starting parallel development");

        let mut handles = Vec::with_capacity(features.len());
        for (index, feature) in features.iter().enumerate() {
            let task = FeatureTask {
                activities: self.activities.clone(),
                settings: self.settings.clone(),
                workspace: workspace.to_path_buf(),
                index,
                feature: feature.clone(),
                state_tx: self.state_tx.clone(),
            };
            handles.push(tokio::spawn(task.run()));
        }

        let mut results = Vec::new();
        for (feature, joined) in features.iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => error!(feature = %feature, "Feature failed: {}", e),
                Err(join_err) => error!(feature = %feature, "Feature task panicked: {}", join_err),
            }
        }

        for result in &results {
            let status = if result.success { "success" } else { "failed" };
            info!(feature = %result.feature, branch = %result.branch, "{}", status);
        }

        results
    }
}

struct FeatureTask {
    activities: Activities,
    settings: ParallelSettings,
    workspace: PathBuf,
    index: usize,
    feature: String,
    state_tx: watch::Sender<WorkflowState>,
}

impl FeatureTask {
    async fn run(self) -> Result<FeatureResult, WorkflowError> {
        let branch = branch_name(self.index, &self.feature);
        let stage = format!("feature-{}", self.feature);

        let branch_request = ExecutionRequest {
            prompt: format!("Create git branch {branch} and switch to it"),
            workspace: self.workspace.clone(),
            max_tokens: self.settings.branch_max_tokens,
            temperature: self.settings.branch_temperature,
        };
        let branch_result = self.activities.execute(&stage, &branch_request).await?;
        self.add_usage(branch_result.tokens_used, branch_result.cost);

        let feature_request = ExecutionRequest {
            prompt: format!("Implement feature: {}. Include tests.", self.feature),
            workspace: self.workspace.clone(),
            max_tokens: self.settings.feature_max_tokens,
            temperature: self.settings.feature_temperature,
        };
        let result = self.activities.execute(&stage, &feature_request).await?;
        self.add_usage(result.tokens_used, result.cost);

        let validation = self.activities.validate(&stage, &self.workspace).await?;
        if validation.success {
            self.state_tx.send_modify(|state| state.tests_passed += 1);
        }

        self.activities
            .record(&MetricsRecord::from_execution(&stage, &result, validation.success))
            .await;

        Ok(FeatureResult {
            feature: self.feature,
            branch,
            success: validation.success,
            tokens_used: result.tokens_used,
            validation: Some(validation),
        })
    }

    fn add_usage(&self, tokens: u64, cost: f64) {
        self.state_tx.send_modify(|state| state.add_usage(tokens, cost));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_names_are_slugged() {
        assert_eq!(branch_name(0, "User Login"), "feature-0-user-login");
        assert_eq!(branch_name(3, "search"), "feature-3-search");
    }
}
