//! `run`, `fix` and `parallel`: start a run and drive it to completion.
//!
//! While the run is in flight this process mirrors its state to
//! `.devflow/runs/<run-id>/state.json` and picks up decisions that
//! `devflow approve|reject` leave in the run's signal file.

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::Select;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use devflow::config::{DEVFLOW_DIR, EngineConfig};
use devflow::engine::FeatureResult;
use devflow::stage::{StageConfig, StagesFile, TEMPLATE_NAMES};
use devflow::state::{RunStatus, RunStore};
use devflow::{
    Capabilities, Decision, Engine, RunHandle, RunOutcome, RunRequest, StageDefinition, WorkflowError,
    WorkflowState,
};

use super::load_config;
use crate::Cli;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Flags of `devflow run`.
pub struct PipelineOptions {
    pub template: Option<String>,
    pub stages_file: Option<PathBuf>,
    pub skip: Vec<String>,
    pub auto_approve: bool,
    pub interactive: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum GateMode {
    /// Wait for `devflow approve|reject`.
    External,
    Auto,
    Interactive,
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, options: PipelineOptions) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let stages = resolve_stages(&config, project_dir, &options)?;
    if stages.is_empty() {
        bail!("No stages left to run after applying skips");
    }

    println!(
        "{} Running {} stage(s) in {}",
        style("▶").cyan().bold(),
        stages.len(),
        project_dir.display()
    );

    let mode = if options.auto_approve {
        GateMode::Auto
    } else if options.interactive {
        GateMode::Interactive
    } else {
        GateMode::External
    };

    let outcome = start_and_drive(project_dir, config, RunRequest::Pipeline { stages }, mode).await?;
    if let RunOutcome::Pipeline(state) = outcome {
        print_pipeline_summary(&state);
    }
    Ok(())
}

pub async fn cmd_fix(cli: &Cli, project_dir: &Path, issue: &str, max_iterations: Option<u32>) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let max_iterations = max_iterations.unwrap_or(config.refiner.default_max_iterations);

    println!(
        "{} Fixing: {} (up to {} iteration(s))",
        style("▶").cyan().bold(),
        issue,
        max_iterations
    );

    let request = RunRequest::Refine {
        issue: issue.to_string(),
        max_iterations,
    };
    let outcome = start_and_drive(project_dir, config, request, GateMode::External).await?;
    if let RunOutcome::Refined(summary) = outcome {
        println!("{} {}", style("✓").green().bold(), summary.message);
        println!(
            "  Tokens: {}  Cost: ${:.4}  Snapshots: {}",
            summary.total_tokens,
            summary.total_cost,
            summary.snapshots.len()
        );
    }
    Ok(())
}

pub async fn cmd_parallel(cli: &Cli, project_dir: &Path, features: &[String]) -> Result<()> {
    let config = load_config(cli, project_dir)?;

    println!(
        "{} Developing {} feature(s) in parallel",
        style("▶").cyan().bold(),
        features.len()
    );

    let request = RunRequest::Parallel {
        features: features.to_vec(),
    };
    let outcome = start_and_drive(project_dir, config, request, GateMode::External).await?;
    if let RunOutcome::Parallel(results) = outcome {
        print_feature_results(features, &results);
    }
    Ok(())
}

/// Explicit stages file (flag, then config) or a built-in template.
fn resolve_stages(config: &EngineConfig, project_dir: &Path, options: &PipelineOptions) -> Result<Vec<StageDefinition>> {
    let stages_file = options
        .stages_file
        .clone()
        .or_else(|| config.workflow.stages_file.clone());

    let base = match stages_file {
        Some(path) => StageConfig::new(StagesFile::load(&path)?.stages),
        None => {
            let template = options.template.as_deref().unwrap_or(&config.workflow.template);
            if !TEMPLATE_NAMES.contains(&template) {
                bail!(
                    "Unknown template '{}'. Available: {}",
                    template,
                    TEMPLATE_NAMES.join(", ")
                );
            }
            StageConfig::for_template(template)
        }
    };

    let mut skip = config.workflow.skip_stages.clone();
    skip.extend(options.skip.iter().cloned());

    Ok(base
        .skip(skip)
        .with_custom_prompts(config.workflow.custom_prompts.clone())
        .stages(project_dir))
}

async fn start_and_drive(
    project_dir: &Path,
    config: EngineConfig,
    request: RunRequest,
    mode: GateMode,
) -> Result<RunOutcome> {
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let store = RunStore::new(&project_dir.join(DEVFLOW_DIR));
    let caps = Capabilities::from_config(&config)?;
    let engine = Engine::new(caps, config);
    let handle = engine.start(project_dir.to_path_buf(), request);

    println!("  Run id: {}", style(&handle.run_id).bold());
    if mode == GateMode::External && handle.kind == devflow::state::RunKind::Pipeline {
        println!(
            "  {}",
            style(format!(
                "Approve gates with `devflow approve {}` or `devflow reject {}`",
                handle.run_id, handle.run_id
            ))
            .dim()
        );
    }

    drive(&engine, handle, &store, mode).await
}

/// Poll until the run task ends, mirroring state and relaying decisions.
async fn drive(engine: &Engine, handle: RunHandle, store: &RunStore, mode: GateMode) -> Result<RunOutcome> {
    let run_id = handle.run_id.clone();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut announced_stage = String::new();
    let mut answered_gate: Option<String> = None;

    while !handle.is_finished() {
        ticker.tick().await;

        let Some(view) = engine.query(&run_id) else {
            break;
        };
        store.save(&view)?;

        if view.state.current_stage != announced_stage {
            announced_stage = view.state.current_stage.clone();
            println!("  {} {}", style("→").cyan(), announced_stage);
        }

        if let Some(decision) = store.take_signal(&run_id)? {
            relay(engine, &run_id, decision)?;
            continue;
        }

        let gate_stage = &view.state.current_stage;
        if view.status == RunStatus::AwaitingApproval && answered_gate.as_ref() != Some(gate_stage) {
            answered_gate = Some(gate_stage.clone());
            match mode {
                GateMode::External => {}
                GateMode::Auto => relay(engine, &run_id, Decision::Approve)?,
                GateMode::Interactive => {
                    let stage = gate_stage.clone();
                    let decision = tokio::task::spawn_blocking(move || prompt_decision(&stage))
                        .await
                        .context("Approval prompt panicked")??;
                    relay(engine, &run_id, decision)?;
                }
            }
        }
    }

    let joined = handle.join().await;
    if let Some(view) = engine.query(&run_id) {
        store.save(&view)?;
    }
    let result = joined.context("Run task panicked")?;

    result.map_err(|e| report_failure(&run_id, e))
}

fn relay(engine: &Engine, run_id: &str, decision: Decision) -> Result<()> {
    if engine.signal(run_id, decision)? {
        let verb = match decision {
            Decision::Approve => "approved",
            Decision::Reject => "rejected",
        };
        println!("  {} Gate {}", style("✓").green(), verb);
    } else {
        warn!(run_id, %decision, "Dropped signal: no approval pending");
    }
    Ok(())
}

fn prompt_decision(stage: &str) -> Result<Decision> {
    let choice = Select::new()
        .with_prompt(format!("Stage '{stage}' complete. Approve?"))
        .items(&["Approve", "Reject"])
        .default(0)
        .interact()
        .context("Failed to read approval")?;
    Ok(if choice == 0 { Decision::Approve } else { Decision::Reject })
}

fn report_failure(run_id: &str, error: WorkflowError) -> anyhow::Error {
    let report = error.report();
    eprintln!("{} Run {} failed", style("✗").red().bold(), run_id);
    if let Some(ref stage) = report.stage {
        eprintln!("  Stage:       {stage}");
    }
    eprintln!("  Kind:        {}", report.kind);
    eprintln!("  Rolled back: {}", report.rolled_back);
    anyhow::Error::new(error)
}

fn print_pipeline_summary(state: &WorkflowState) {
    println!("{} Pipeline completed", style("✓").green().bold());
    println!("  Tokens:       {}", state.total_tokens);
    println!("  Cost:         ${:.4}", state.total_cost);
    println!("  Tests passed: {}", state.tests_passed);
    println!("  Snapshots:    {}", state.snapshots.len());
    if !state.non_critical_failures.is_empty() {
        println!(
            "  {} non-critical stage(s) failed tests: {}",
            style("!").yellow().bold(),
            state.non_critical_failures.join(", ")
        );
    }
}

fn print_feature_results(requested: &[String], results: &[FeatureResult]) {
    for result in results {
        let mark = if result.success {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        println!(
            "  {} {} ({}, {} tokens)",
            mark, result.feature, result.branch, result.tokens_used
        );
    }
    let missing = requested.len() - results.len();
    if missing > 0 {
        println!(
            "  {} {} feature(s) aborted; see log for details",
            style("!").yellow().bold(),
            missing
        );
    }
}
