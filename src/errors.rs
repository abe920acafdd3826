//! Typed error hierarchy for the devflow engine.
//!
//! Three enums cover the three layers:
//! - `CapabilityError`: a single adapter call (executor, validator, git, ...)
//! - `WorkflowError`: terminal, non-retryable run failures
//! - `EngineError`: control-surface misuse (unknown run ids)

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by an external capability call.
///
/// Only the transient variants are retried by [`crate::engine::RetryPolicy`];
/// the rest surface immediately.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Invalid input: {0}")]
    Invalid(String),
}

impl CapabilityError {
    /// Network and process hiccups are worth another attempt; a missing
    /// workspace or bad input is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CapabilityError::Timeout { .. } | CapabilityError::Process(_) | CapabilityError::Network(_)
        )
    }
}

/// Terminal failures that end a run. None of these are retried.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Critical stage {stage} failed tests (rolled back: {rolled_back})")]
    ValidationFailure { stage: String, rolled_back: bool },

    #[error("Stage {stage} rejected by developer")]
    ApprovalRejected { stage: String },

    #[error("Approval timeout for stage {stage} after {}s", .timeout.as_secs())]
    ApprovalTimeout { stage: String, timeout: Duration },

    #[error("Failed to fix issue after {max_iterations} iterations (last: {stage})")]
    IterationBudgetExhausted { stage: String, max_iterations: u32 },

    #[error("Final test suite failed ({failed} failing)")]
    FinalValidationFailure { stage: String, failed: u32 },

    #[error("Stage {stage} aborted: {source}")]
    Capability {
        stage: String,
        #[source]
        source: CapabilityError,
    },
}

/// Machine-readable failure tag carried by [`FailureReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationFailure,
    ApprovalRejected,
    ApprovalTimeout,
    IterationBudgetExhausted,
    FinalValidationFailure,
    TransientCapabilityError,
    WorkspaceError,
    /// The run task panicked instead of returning.
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::ValidationFailure => "validation_failure",
            FailureKind::ApprovalRejected => "approval_rejected",
            FailureKind::ApprovalTimeout => "approval_timeout",
            FailureKind::IterationBudgetExhausted => "iteration_budget_exhausted",
            FailureKind::FinalValidationFailure => "final_validation_failure",
            FailureKind::TransientCapabilityError => "transient_capability_error",
            FailureKind::WorkspaceError => "workspace_error",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// What a caller sees when a run terminates abnormally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub stage: Option<String>,
    pub kind: FailureKind,
    pub rolled_back: bool,
    pub message: String,
}

impl WorkflowError {
    /// Stage that aborted the run.
    pub fn stage(&self) -> &str {
        match self {
            WorkflowError::ValidationFailure { stage, .. }
            | WorkflowError::ApprovalRejected { stage }
            | WorkflowError::ApprovalTimeout { stage, .. }
            | WorkflowError::IterationBudgetExhausted { stage, .. }
            | WorkflowError::FinalValidationFailure { stage, .. }
            | WorkflowError::Capability { stage, .. } => stage,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            WorkflowError::ValidationFailure { .. } => FailureKind::ValidationFailure,
            WorkflowError::ApprovalRejected { .. } => FailureKind::ApprovalRejected,
            WorkflowError::ApprovalTimeout { .. } => FailureKind::ApprovalTimeout,
            WorkflowError::IterationBudgetExhausted { .. } => FailureKind::IterationBudgetExhausted,
            WorkflowError::FinalValidationFailure { .. } => FailureKind::FinalValidationFailure,
            WorkflowError::Capability { source, .. } => {
                if source.is_transient() {
                    FailureKind::TransientCapabilityError
                } else {
                    FailureKind::WorkspaceError
                }
            }
        }
    }

    pub fn rolled_back(&self) -> bool {
        matches!(self, WorkflowError::ValidationFailure { rolled_back: true, .. })
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            stage: Some(self.stage().to_string()),
            kind: self.kind(),
            rolled_back: self.rolled_back(),
            message: self.to_string(),
        }
    }
}

/// Errors from the engine's control surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Run {0} not found")]
    RunNotFound(String),
}
