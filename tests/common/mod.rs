//! Scriptable in-memory capabilities for engine tests.
//!
//! Every call is appended to a shared log stamped with `tokio::time::Instant`,
//! so tests running on a paused clock can assert exact gaps between calls.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use devflow::capability::{
    Complexity, CostEstimate, ExecutionRequest, ExecutionResult, Executor, MetricsRecord, MetricsSink, Notification,
    Notifier, SnapshotId, ValidationResult, Validator, VersionedWorkspace, CostEstimator,
};
use devflow::{Capabilities, CapabilityError, EngineConfig, StageDefinition};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Estimate(Complexity),
    Snapshot(String),
    Restore(String),
    Execute(String),
    Validate,
    Notify(String),
    Metrics { stage: String, error: Option<String> },
}

#[derive(Default)]
pub struct Recorder {
    log: Mutex<Vec<(Instant, Call)>>,
    validations: Mutex<VecDeque<bool>>,
    execute_errors: Mutex<VecDeque<CapabilityError>>,
    fail_prompts_containing: Mutex<Option<String>>,
    panic_prompts_containing: Mutex<Option<String>>,
    snapshots_taken: Mutex<u32>,
    tokens_per_call: u64,
    execute_delay: Duration,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_tokens(100))
    }

    pub fn with_tokens(tokens_per_call: u64) -> Self {
        Self {
            tokens_per_call,
            ..Default::default()
        }
    }

    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    /// Results for the next validator calls, in order. Once drained, every
    /// run passes.
    pub fn script_validations(&self, outcomes: &[bool]) {
        self.validations.lock().unwrap().extend(outcomes.iter().copied());
    }

    /// Errors returned by the next executor calls before it starts succeeding.
    pub fn script_execute_errors(&self, errors: Vec<CapabilityError>) {
        self.execute_errors.lock().unwrap().extend(errors);
    }

    /// Make every execution whose prompt contains `needle` fail permanently.
    pub fn fail_prompts_containing(&self, needle: &str) {
        *self.fail_prompts_containing.lock().unwrap() = Some(needle.to_string());
    }

    /// Make every execution whose prompt contains `needle` panic.
    pub fn panic_prompts_containing(&self, needle: &str) {
        *self.panic_prompts_containing.lock().unwrap() = Some(needle.to_string());
    }

    fn push(&self, call: Call) {
        self.log.lock().unwrap().push((Instant::now(), call));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    /// Timestamps of calls matching `pred`, in call order.
    pub fn times_of(&self, pred: impl Fn(&Call) -> bool) -> Vec<Instant> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| pred(c))
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn executions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Execute(prompt) => Some(prompt),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities {
            executor: self.clone(),
            validator: self.clone(),
            workspace: self.clone(),
            estimator: self.clone(),
            notifier: self.clone(),
            metrics: self.clone(),
        }
    }
}

#[async_trait]
impl Executor for Recorder {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, CapabilityError> {
        self.push(Call::Execute(request.prompt.clone()));

        if let Some(err) = self.execute_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let doomed = self
            .fail_prompts_containing
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|needle| request.prompt.contains(needle.as_str()));
        if doomed {
            return Err(CapabilityError::Invalid(format!("cannot do: {}", request.prompt)));
        }
        let explodes = self
            .panic_prompts_containing
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|needle| request.prompt.contains(needle.as_str()));
        if explodes {
            panic!("executor blew up on: {}", request.prompt);
        }

        if !self.execute_delay.is_zero() {
            tokio::time::sleep(self.execute_delay).await;
        }

        Ok(ExecutionResult {
            output: "ok".to_string(),
            tokens_used: self.tokens_per_call,
            cost: 0.01,
            duration_ms: 5,
            files_modified: vec!["src/lib.rs".to_string()],
            lines_added: 3,
            lines_removed: 1,
            diff_url: None,
        })
    }
}

#[async_trait]
impl Validator for Recorder {
    async fn run(&self, _workspace: &Path) -> Result<ValidationResult, CapabilityError> {
        self.push(Call::Validate);
        let success = self.validations.lock().unwrap().pop_front().unwrap_or(true);
        Ok(ValidationResult {
            success,
            total_tests: 1,
            passed: u32::from(success),
            failed: u32::from(!success),
            duration_ms: 1,
            errors: Vec::new(),
            coverage: None,
        })
    }
}

#[async_trait]
impl VersionedWorkspace for Recorder {
    async fn snapshot(&self, _workspace: &Path) -> Result<SnapshotId, CapabilityError> {
        let id = {
            let mut taken = self.snapshots_taken.lock().unwrap();
            *taken += 1;
            format!("snap-{}", *taken)
        };
        self.push(Call::Snapshot(id.clone()));
        Ok(SnapshotId(id))
    }

    async fn restore(&self, _workspace: &Path, snapshot: &SnapshotId) -> Result<bool, CapabilityError> {
        self.push(Call::Restore(snapshot.as_str().to_string()));
        Ok(true)
    }
}

#[async_trait]
impl CostEstimator for Recorder {
    async fn estimate(&self, _prompt: &str, complexity: Complexity) -> Result<CostEstimate, CapabilityError> {
        self.push(Call::Estimate(complexity));
        Ok(CostEstimate {
            estimated_cost: 0.02,
            model: "test-model".to_string(),
            token_estimate: 1000,
        })
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn send(&self, notification: &Notification) -> Result<bool, CapabilityError> {
        self.push(Call::Notify(notification.message.clone()));
        Ok(true)
    }

    fn name(&self) -> String {
        "recorder".to_string()
    }
}

#[async_trait]
impl MetricsSink for Recorder {
    async fn record(&self, record: &MetricsRecord) -> Result<(), CapabilityError> {
        self.push(Call::Metrics {
            stage: record.stage.clone(),
            error: record.error.clone(),
        });
        Ok(())
    }
}

/// Defaults with a short approval window and a high cooldown threshold.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.approval.timeout_secs = 60;
    config.rate_limit.max_tokens_before_cooldown = 1_000_000;
    config
}

pub fn stage(name: &str) -> StageDefinition {
    StageDefinition::new(name, &format!("do {name}"))
}
