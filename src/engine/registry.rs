//! Control surface: start runs, signal their approval gates, query state.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};
use uuid::Uuid;

use super::approval::{ApprovalGate, Decision};
use super::orchestrator::Orchestrator;
use super::parallel::{FeatureResult, ParallelDeveloper};
use super::refiner::{IterativeRefiner, RefinementSummary};
use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::errors::{EngineError, FailureKind, FailureReport, WorkflowError};
use crate::stage::StageDefinition;
use crate::state::{RunKind, RunStatus, StateView, WorkflowState};

/// What to run.
#[derive(Debug, Clone)]
pub enum RunRequest {
    Pipeline { stages: Vec<StageDefinition> },
    Refine { issue: String, max_iterations: u32 },
    Parallel { features: Vec<String> },
}

impl RunRequest {
    pub fn kind(&self) -> RunKind {
        match self {
            RunRequest::Pipeline { .. } => RunKind::Pipeline,
            RunRequest::Refine { .. } => RunKind::IterativeFix,
            RunRequest::Parallel { .. } => RunKind::ParallelDev,
        }
    }
}

/// Final value of a successful run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Pipeline(WorkflowState),
    Refined(RefinementSummary),
    Parallel(Vec<FeatureResult>),
}

type RunResult = Result<RunOutcome, WorkflowError>;

#[derive(Debug, Clone)]
enum Finish {
    Completed,
    Failed(FailureReport),
}

type FinishSlot = Arc<Mutex<Option<Finish>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct RunEntry {
    kind: RunKind,
    gate: Option<Arc<ApprovalGate>>,
    state: watch::Receiver<WorkflowState>,
    finish: FinishSlot,
}

impl RunEntry {
    fn is_finished(&self) -> bool {
        lock(&self.finish).is_some()
    }

    fn view(&self, run_id: &str) -> StateView {
        let view = StateView::new(run_id, self.kind, self.state.borrow().clone());
        match lock(&self.finish).clone() {
            None => view,
            Some(Finish::Completed) => view.completed(),
            Some(Finish::Failed(report)) => view.failed(report),
        }
    }
}

/// Caller's handle on a started run.
pub struct RunHandle {
    pub run_id: String,
    pub kind: RunKind,
    state: watch::Receiver<WorkflowState>,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    pub fn state(&self) -> watch::Receiver<WorkflowState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end.
    pub async fn join(self) -> Result<RunResult, JoinError> {
        self.task.await
    }
}

/// Runs started by this engine, keyed by run id.
pub struct Engine {
    caps: Capabilities,
    config: EngineConfig,
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl Engine {
    pub fn new(caps: Capabilities, config: EngineConfig) -> Self {
        Self {
            caps,
            config,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn new_run_id(kind: RunKind) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", kind.prefix(), &suffix[..12])
    }

    /// Spawn a run on the current tokio runtime.
    pub fn start(&self, workspace: PathBuf, request: RunRequest) -> RunHandle {
        let kind = request.kind();
        let run_id = Self::new_run_id(kind);
        let finish: FinishSlot = Arc::new(Mutex::new(None));
        let caps = self.caps.clone();

        let (gate, state, task) = match request {
            RunRequest::Pipeline { stages } => {
                let orchestrator = Orchestrator::new(caps, &self.config);
                let gate = orchestrator.gate();
                let state = orchestrator.subscribe();
                let task = spawn_run(Arc::clone(&finish), state.clone(), async move {
                    orchestrator.run(&workspace, &stages).await.map(RunOutcome::Pipeline)
                });
                (Some(gate), state, task)
            }
            RunRequest::Refine { issue, max_iterations } => {
                let refiner = IterativeRefiner::new(caps, &self.config);
                let state = refiner.subscribe();
                let task = spawn_run(Arc::clone(&finish), state.clone(), async move {
                    refiner
                        .run(&workspace, &issue, max_iterations)
                        .await
                        .map(RunOutcome::Refined)
                });
                (None, state, task)
            }
            RunRequest::Parallel { features } => {
                let developer = ParallelDeveloper::new(caps, &self.config);
                let state = developer.subscribe();
                let task = spawn_run(Arc::clone(&finish), state.clone(), async move {
                    Ok(RunOutcome::Parallel(developer.run(&workspace, &features).await))
                });
                (None, state, task)
            }
        };

        info!(run_id = %run_id, kind = %kind, "Run started");

        lock(&self.runs).insert(
            run_id.clone(),
            RunEntry {
                kind,
                gate,
                state: state.clone(),
                finish,
            },
        );

        RunHandle {
            run_id,
            kind,
            state,
            task,
        }
    }

    /// Deliver an approval decision. `Ok(false)` means the run exists but
    /// is not waiting on a gate, so the signal was dropped.
    pub fn signal(&self, run_id: &str, decision: Decision) -> Result<bool, EngineError> {
        let runs = lock(&self.runs);
        let entry = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        let accepted = entry.gate.as_ref().is_some_and(|gate| gate.signal(decision));
        info!(run_id, %decision, accepted, "Signal received");
        Ok(accepted)
    }

    pub fn query(&self, run_id: &str) -> Option<StateView> {
        lock(&self.runs).get(run_id).map(|entry| entry.view(run_id))
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.query(run_id).map(|view| view.status)
    }

    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.runs).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget a finished run and return its last view. `Ok(None)` means the
    /// run is still going and was kept.
    pub fn evict(&self, run_id: &str) -> Result<Option<StateView>, EngineError> {
        let mut runs = lock(&self.runs);
        let entry = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        if !entry.is_finished() {
            return Ok(None);
        }
        let view = entry.view(run_id);
        runs.remove(run_id);
        info!(run_id, status = %view.status, "Run evicted");
        Ok(Some(view))
    }

    /// Forget every finished run. Returns how many were dropped.
    pub fn evict_finished(&self) -> usize {
        let mut runs = lock(&self.runs);
        let before = runs.len();
        runs.retain(|_, entry| !entry.is_finished());
        before - runs.len()
    }
}

fn spawn_run<F>(finish: FinishSlot, state: watch::Receiver<WorkflowState>, run: F) -> JoinHandle<RunResult>
where
    F: std::future::Future<Output = RunResult> + Send + 'static,
{
    tokio::spawn(async move {
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => {
                *lock(&finish) = Some(match &result {
                    Ok(_) => Finish::Completed,
                    Err(e) => Finish::Failed(e.report()),
                });
                result
            }
            Err(payload) => {
                let stage = state.borrow().current_stage.clone();
                let message = format!("Run panicked: {}", panic_message(payload.as_ref()));
                error!(stage = %stage, "{}", message);
                *lock(&finish) = Some(Finish::Failed(FailureReport {
                    stage: Some(stage),
                    kind: FailureKind::Internal,
                    rolled_back: false,
                    message,
                }));
                std::panic::resume_unwind(payload)
            }
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
