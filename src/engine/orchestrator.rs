//! Linear stage pipeline.
//!
//! Per stage: estimate, snapshot (critical stages only), execute, validate,
//! approval gate, metrics, cooldown. A critical stage whose tests fail rolls
//! the workspace back to the most recent snapshot and ends the run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::activities::Activities;
use super::approval::{ApprovalGate, Decision};
use super::rate_limit::RateLimiter;
use crate::capability::{Capabilities, Complexity, ExecutionRequest, ExecutionResult, MetricsRecord, Notification};
use crate::config::EngineConfig;
use crate::errors::WorkflowError;
use crate::stage::StageDefinition;
use crate::state::WorkflowState;

pub struct Orchestrator {
    activities: Activities,
    gate: Arc<ApprovalGate>,
    limiter: RateLimiter,
    approval_timeout: Duration,
    state_tx: watch::Sender<WorkflowState>,
}

impl Orchestrator {
    pub fn new(caps: Capabilities, config: &EngineConfig) -> Self {
        let (state_tx, _) = watch::channel(WorkflowState::new());
        Self {
            activities: Activities::new(caps, config),
            gate: Arc::new(ApprovalGate::new()),
            limiter: RateLimiter::new(config.rate_limit.max_tokens_before_cooldown, config.cooldown()),
            approval_timeout: config.approval_timeout(),
            state_tx,
        }
    }

    /// Gate that `signal` delivers decisions to.
    pub fn gate(&self) -> Arc<ApprovalGate> {
        Arc::clone(&self.gate)
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state_tx.subscribe()
    }

    fn publish(&self, state: &WorkflowState) {
        self.state_tx.send_replace(state.clone());
    }

    pub async fn run(&self, workspace: &Path, stages: &[StageDefinition]) -> Result<WorkflowState, WorkflowError> {
        let mut state = WorkflowState::new();
        self.publish(&state);

        info!(stages = stages.len(), workspace = %workspace.display(), "Starting pipeline");

        match self.run_stages(workspace, stages, &mut state).await {
            Ok(()) => {
                if !state.non_critical_failures.is_empty() {
                    warn!(
                        stages = %state.non_critical_failures.join(", "),
                        "Pipeline finished with failing non-critical stages"
                    );
                }
                info!(
                    tokens = state.total_tokens,
                    cost = state.total_cost,
                    tests_passed = state.tests_passed,
                    "Pipeline complete"
                );
                Ok(state)
            }
            Err(e) => {
                error!(stage = %state.current_stage, "Pipeline failed: {}", e);
                self.activities
                    .record(&MetricsRecord::failure(&state.current_stage, e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        workspace: &Path,
        stages: &[StageDefinition],
        state: &mut WorkflowState,
    ) -> Result<(), WorkflowError> {
        for stage in stages {
            self.run_stage(workspace, stage, state).await?;
            self.limiter.throttle(state.total_tokens).await;
        }

        state.enter("final-validation");
        self.publish(state);
        let final_result = self.activities.validate("final-validation", workspace).await?;
        if !final_result.success {
            return Err(WorkflowError::FinalValidationFailure {
                stage: state.current_stage.clone(),
                failed: final_result.failed,
            });
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        workspace: &Path,
        stage: &StageDefinition,
        state: &mut WorkflowState,
    ) -> Result<(), WorkflowError> {
        state.enter(&stage.name);
        self.publish(state);
        info!(stage = %stage.name, "=== Starting stage ===");

        let complexity = if stage.critical_path {
            Complexity::High
        } else {
            Complexity::Medium
        };
        if let Some(estimate) = self.activities.estimate(&stage.prompt, complexity).await {
            info!(
                stage = %stage.name,
                tokens = estimate.token_estimate,
                "Estimated cost: ${:.4}",
                estimate.estimated_cost
            );
        }

        if stage.critical_path {
            let snapshot = self.activities.snapshot(&stage.name, workspace).await?;
            info!(stage = %stage.name, snapshot = %snapshot, "Created snapshot");
            state.push_snapshot(snapshot);
            self.publish(state);
        }

        let request = ExecutionRequest {
            prompt: stage.prompt.clone(),
            workspace: workspace.to_path_buf(),
            max_tokens: stage.max_tokens,
            temperature: stage.temperature,
        };
        let result = self.activities.execute(&stage.name, &request).await?;
        state.add_usage(result.tokens_used, result.cost);
        self.publish(state);

        let mut tests_pass = true;
        if !stage.skip_tests {
            let validation = self.activities.validate(&stage.name, workspace).await?;
            if validation.success {
                state.tests_passed += 1;
            } else {
                tests_pass = false;
                error!(stage = %stage.name, failed = validation.failed, "Tests failed");

                if stage.critical_path {
                    let rolled_back = match state.last_snapshot() {
                        Some(snapshot) => {
                            info!(snapshot = %snapshot, "Rolling back");
                            self.activities.restore(workspace, snapshot).await
                        }
                        None => false,
                    };
                    return Err(WorkflowError::ValidationFailure {
                        stage: stage.name.clone(),
                        rolled_back,
                    });
                }

                warn!(stage = %stage.name, "Non-critical stage failed tests, continuing");
                state.non_critical_failures.push(stage.name.clone());
            }
            self.publish(state);
        }

        if stage.requires_approval {
            self.await_approval(stage, &result, state).await?;
        }

        self.activities
            .record(&MetricsRecord::from_execution(&stage.name, &result, tests_pass))
            .await;

        Ok(())
    }

    async fn await_approval(
        &self,
        stage: &StageDefinition,
        result: &ExecutionResult,
        state: &mut WorkflowState,
    ) -> Result<(), WorkflowError> {
        self.gate.arm();
        state.pending_approval = true;
        self.publish(state);

        let notification = Notification {
            stage: stage.name.clone(),
            message: format!("Stage '{}' complete. Review required.", stage.name),
            files_changed: result.files_modified.clone(),
            diff_url: result.diff_url.clone(),
        };
        self.activities.notify(&notification).await;

        info!(stage = %stage.name, "Waiting for approval");
        let decision = self.gate.wait(self.approval_timeout).await;

        state.pending_approval = false;
        self.publish(state);

        match decision {
            Ok(Decision::Approve) => {
                info!(stage = %stage.name, "Stage approved, continuing");
                Ok(())
            }
            Ok(Decision::Reject) => Err(WorkflowError::ApprovalRejected {
                stage: stage.name.clone(),
            }),
            Err(_) => Err(WorkflowError::ApprovalTimeout {
                stage: stage.name.clone(),
                timeout: self.approval_timeout,
            }),
        }
    }
}
