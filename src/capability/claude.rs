use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::cost::{ModelPricing, estimate_tokens};
use super::git::{ChangeSummary, change_summary};
use super::{ExecutionRequest, ExecutionResult, Executor, ensure_workspace};
use crate::config::ExecutorSettings;
use crate::errors::CapabilityError;

/// Runs the Claude CLI non-interactively inside the workspace.
pub struct ClaudeExecutor {
    settings: ExecutorSettings,
    pricing: ModelPricing,
}

impl ClaudeExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        let pricing = ModelPricing::for_model(&settings.model);
        Self { settings, pricing }
    }

    async fn workspace_changes(workspace: &Path) -> ChangeSummary {
        let path = workspace.to_path_buf();
        match tokio::task::spawn_blocking(move || change_summary(&path)).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                debug!("No git change summary: {:#}", e);
                ChangeSummary::default()
            }
            Err(e) => {
                warn!("Change summary task failed: {}", e);
                ChangeSummary::default()
            }
        }
    }
}

fn preview(prompt: &str) -> String {
    prompt.chars().take(100).collect()
}

#[async_trait]
impl Executor for ClaudeExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, CapabilityError> {
        ensure_workspace(&request.workspace)?;

        info!(workspace = %request.workspace.display(), "Executing agent");
        debug!(prompt = %preview(&request.prompt), max_tokens = request.max_tokens, "Prompt");

        let start = Instant::now();
        let child = Command::new(&self.settings.command)
            .arg("--print")
            .arg(&request.prompt)
            .current_dir(&request.workspace)
            .env("CLAUDE_MAX_TOKENS", request.max_tokens.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CapabilityError::Process(format!("Failed to spawn {}: {}", self.settings.command, e))
            })?;

        let limit = self.settings.timeout();
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| CapabilityError::Process(format!("Failed to wait for agent: {e}")))?,
            Err(_) => {
                return Err(CapabilityError::Timeout {
                    operation: "agent execution".to_string(),
                    after: limit,
                });
            }
        };

        if !output.status.success() {
            warn!(
                code = output.status.code().unwrap_or(-1),
                "Agent exited with non-zero status"
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = if stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            stdout.to_string()
        };

        let changes = Self::workspace_changes(&request.workspace).await;

        let tokens_used = estimate_tokens(&format!("{}{}", request.prompt, text));
        let cost = self.pricing.cost(tokens_used);
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            tokens = tokens_used,
            files = changes.files.len(),
            "Completed in {}ms, cost ${:.4}",
            duration_ms,
            cost
        );

        Ok(ExecutionResult {
            output: text,
            tokens_used,
            cost,
            duration_ms,
            files_modified: changes.files,
            lines_added: changes.lines_added,
            lines_removed: changes.lines_removed,
            diff_url: None,
        })
    }
}
