//! Run state, its query projection, and on-disk mirroring.
//!
//! A run's `WorkflowState` is owned by the task driving it. Everyone else
//! sees `StateView` copies, either through a `watch` channel inside the
//! process or through `.devflow/runs/<run-id>/state.json` from another one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::capability::SnapshotId;
use crate::engine::Decision;
use crate::errors::FailureReport;

pub const INITIAL_STAGE: &str = "initializing";

/// Mutable progress of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub current_stage: String,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub tests_passed: u32,
    #[serde(default)]
    pub snapshots: Vec<SnapshotId>,
    #[serde(default)]
    pub pending_approval: bool,
    /// Non-critical stages whose tests failed but did not stop the run.
    #[serde(default)]
    pub non_critical_failures: Vec<String>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            current_stage: INITIAL_STAGE.to_string(),
            total_tokens: 0,
            total_cost: 0.0,
            tests_passed: 0,
            snapshots: Vec::new(),
            pending_approval: false,
            non_critical_failures: Vec::new(),
        }
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, stage: &str) {
        self.current_stage = stage.to_string();
    }

    pub fn add_usage(&mut self, tokens: u64, cost: f64) {
        self.total_tokens += tokens;
        self.total_cost += cost;
    }

    pub fn push_snapshot(&mut self, snapshot: SnapshotId) {
        self.snapshots.push(snapshot);
    }

    /// Rollback target: always the most recently taken snapshot.
    pub fn last_snapshot(&self) -> Option<&SnapshotId> {
        self.snapshots.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunKind {
    Pipeline,
    IterativeFix,
    ParallelDev,
}

impl RunKind {
    /// Run-id prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            RunKind::Pipeline => "pipeline",
            RunKind::IterativeFix => "iterative-fix",
            RunKind::ParallelDev => "parallel-dev",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingApproval,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::AwaitingApproval => write!(f, "awaiting approval"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What `query` returns: a point-in-time copy of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateView {
    pub run_id: String,
    pub kind: RunKind,
    pub status: RunStatus,
    pub state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    pub updated_at: DateTime<Utc>,
}

impl StateView {
    pub fn new(run_id: &str, kind: RunKind, state: WorkflowState) -> Self {
        let status = if state.pending_approval {
            RunStatus::AwaitingApproval
        } else {
            RunStatus::Running
        };
        Self {
            run_id: run_id.to_string(),
            kind,
            status,
            state,
            failure: None,
            updated_at: Utc::now(),
        }
    }

    pub fn completed(mut self) -> Self {
        self.status = RunStatus::Completed;
        self
    }

    pub fn failed(mut self, report: FailureReport) -> Self {
        self.status = RunStatus::Failed;
        self.failure = Some(report);
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Per-run directories under `.devflow/runs`.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(devflow_dir: &Path) -> Self {
        Self {
            root: devflow_dir.join("runs"),
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn state_file(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("state.json")
    }

    fn signal_file(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("signal")
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.state_file(run_id).exists()
    }

    /// Write the view atomically (temp file + rename).
    pub fn save(&self, view: &StateView) -> Result<()> {
        let dir = self.run_dir(&view.run_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run directory: {}", dir.display()))?;

        let content = serde_json::to_string_pretty(view).context("Failed to serialize run state")?;
        let tmp = dir.join("state.json.tmp");
        fs::write(&tmp, content).context("Failed to write run state")?;
        fs::rename(&tmp, self.state_file(&view.run_id)).context("Failed to replace run state")?;
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<StateView>> {
        let path = self.state_file(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run state: {}", path.display()))?;
        let view = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run state: {}", path.display()))?;
        Ok(Some(view))
    }

    /// Leave a decision for the process driving `run_id` to pick up.
    pub fn write_signal(&self, run_id: &str, decision: Decision) -> Result<()> {
        let path = self.signal_file(run_id);
        fs::write(&path, decision.as_str())
            .with_context(|| format!("Failed to write signal file: {}", path.display()))
    }

    /// Consume a pending signal, if any. Unrecognised content is discarded.
    pub fn take_signal(&self, run_id: &str) -> Result<Option<Decision>> {
        let path = self.signal_file(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read signal file: {}", path.display()))?;
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove signal file: {}", path.display()))?;
        Ok(content.trim().parse().ok())
    }

    /// Known run ids, newest directory name last.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list {}", self.root.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join("state.json").exists())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
