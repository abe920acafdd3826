use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::activities::Activities;
use crate::capability::{Capabilities, ExecutionRequest, MetricsRecord, SnapshotId};
use crate::config::{EngineConfig, RefinerSettings};
use crate::errors::WorkflowError;
use crate::state::WorkflowState;

/// Outcome of a successful refinement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementSummary {
    pub iterations: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub snapshots: Vec<SnapshotId>,
    pub message: String,
}

/// Repeats one corrective stage until the tests pass.
pub struct IterativeRefiner {
    activities: Activities,
    settings: RefinerSettings,
    state_tx: watch::Sender<WorkflowState>,
}

impl IterativeRefiner {
    pub fn new(caps: Capabilities, config: &EngineConfig) -> Self {
        let (state_tx, _) = watch::channel(WorkflowState::new());
        Self {
            activities: Activities::new(caps, config),
            settings: config.refiner.clone(),
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state_tx.subscribe()
    }

    /// Sleep before iteration `iteration + 1`: linear in the iteration
    /// count, capped.
    pub fn backoff(&self, iteration: u32) -> Duration {
        let secs = self
            .settings
            .backoff_base_secs
            .saturating_mul(u64::from(iteration))
            .min(self.settings.backoff_max_secs);
        Duration::from_secs(secs)
    }

    pub async fn run(
        &self,
        workspace: &Path,
        issue: &str,
        max_iterations: u32,
    ) -> Result<RefinementSummary, WorkflowError> {
        let mut state = WorkflowState::new();
        self.state_tx.send_replace(state.clone());

        info!(issue, max_iterations, "Starting iterative refinement");

        match self.iterate(workspace, issue, max_iterations, &mut state).await {
            Ok(iterations) => {
                let message = format!("Issue resolved in {iterations} iteration(s)");
                info!(tokens = state.total_tokens, "{}", message);
                Ok(RefinementSummary {
                    iterations,
                    total_tokens: state.total_tokens,
                    total_cost: state.total_cost,
                    snapshots: state.snapshots,
                    message,
                })
            }
            Err(e) => {
                error!(stage = %state.current_stage, "Refinement failed: {}", e);
                self.activities
                    .record(&MetricsRecord::failure(&state.current_stage, e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn iterate(
        &self,
        workspace: &Path,
        issue: &str,
        max_iterations: u32,
        state: &mut WorkflowState,
    ) -> Result<u32, WorkflowError> {
        let mut iteration = 0;

        while iteration < max_iterations {
            iteration += 1;
            let stage = format!("iteration-{iteration}");
            state.enter(&stage);
            self.state_tx.send_replace(state.clone());
            info!(iteration, "=== Iteration ===");

            let snapshot = self.activities.snapshot(&stage, workspace).await?;
            state.push_snapshot(snapshot);

            let request = ExecutionRequest {
                prompt: format!(
                    "Fix this issue: {}. Previous attempts: {}. Run tests after fixing.",
                    issue,
                    iteration - 1
                ),
                workspace: workspace.to_path_buf(),
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            };
            let result = self.activities.execute(&stage, &request).await?;
            state.add_usage(result.tokens_used, result.cost);
            self.state_tx.send_replace(state.clone());

            let validation = self.activities.validate(&stage, workspace).await?;
            if validation.success {
                state.tests_passed += 1;
            }
            self.state_tx.send_replace(state.clone());

            self.activities
                .record(&MetricsRecord::from_execution(&stage, &result, validation.success))
                .await;

            if validation.success {
                return Ok(iteration);
            }

            if iteration < max_iterations {
                let delay = self.backoff(iteration);
                warn!(
                    iteration,
                    max_iterations,
                    "Tests still failing. Retrying in {}s",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(WorkflowError::IterationBudgetExhausted {
            stage: state.current_stage.clone(),
            max_iterations,
        })
    }
}
