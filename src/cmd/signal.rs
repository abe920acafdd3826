use anyhow::{Result, bail};
use console::style;
use std::path::Path;

use devflow::Decision;
use devflow::config::DEVFLOW_DIR;
use devflow::state::{RunStatus, RunStore};

/// Leave an approval decision for the process driving `run_id`.
pub fn cmd_signal(project_dir: &Path, run_id: &str, decision: Decision) -> Result<()> {
    let store = RunStore::new(&project_dir.join(DEVFLOW_DIR));
    let Some(view) = store.load(run_id)? else {
        bail!("Run {} not found", run_id);
    };
    if view.is_finished() {
        bail!("Run {} already {}", run_id, view.status);
    }

    store.write_signal(run_id, decision)?;

    if view.status == RunStatus::AwaitingApproval {
        println!(
            "{} Sent {} to {} (stage '{}')",
            style("✓").green().bold(),
            decision,
            run_id,
            view.state.current_stage
        );
    } else {
        println!(
            "{} Sent {} to {}; it is not waiting on a gate, so the signal will be dropped",
            style("!").yellow().bold(),
            decision,
            run_id
        );
    }
    Ok(())
}

pub fn cmd_status(project_dir: &Path, run_id: Option<&str>, json: bool) -> Result<()> {
    let store = RunStore::new(&project_dir.join(DEVFLOW_DIR));

    let Some(run_id) = run_id else {
        let ids = store.list()?;
        if ids.is_empty() {
            println!("No runs recorded in {}", project_dir.join(DEVFLOW_DIR).display());
        }
        for id in ids {
            if let Some(view) = store.load(&id)? {
                println!("{:<32} {:<18} {}", id, view.status.to_string(), view.state.current_stage);
            }
        }
        return Ok(());
    };

    let Some(view) = store.load(run_id)? else {
        bail!("Run {} not found", run_id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let status = match view.status {
        RunStatus::Completed => style(view.status.to_string()).green(),
        RunStatus::Failed => style(view.status.to_string()).red(),
        RunStatus::AwaitingApproval => style(view.status.to_string()).yellow(),
        RunStatus::Running => style(view.status.to_string()).cyan(),
    };

    println!("{}", style(&view.run_id).bold());
    println!("  Kind:         {}", view.kind);
    println!("  Status:       {}", status);
    println!("  Stage:        {}", view.state.current_stage);
    println!("  Tokens:       {}", view.state.total_tokens);
    println!("  Cost:         ${:.4}", view.state.total_cost);
    println!("  Tests passed: {}", view.state.tests_passed);
    println!("  Snapshots:    {}", view.state.snapshots.len());
    if !view.state.non_critical_failures.is_empty() {
        println!("  Non-critical: {}", view.state.non_critical_failures.join(", "));
    }
    if let Some(ref failure) = view.failure {
        println!("  Failure:      {} ({})", failure.message, failure.kind);
        println!("  Rolled back:  {}", failure.rolled_back);
    }
    println!("  Updated:      {}", view.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}
