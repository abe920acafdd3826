use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{MetricsRecord, MetricsSink};
use crate::errors::CapabilityError;

/// Appends one JSON object per line to a metrics file.
#[derive(Debug, Clone)]
pub struct JsonlMetricsSink {
    path: PathBuf,
}

impl JsonlMetricsSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[async_trait]
impl MetricsSink for JsonlMetricsSink {
    async fn record(&self, record: &MetricsRecord) -> Result<(), CapabilityError> {
        let line = serde_json::to_string(record).map_err(|e| CapabilityError::Invalid(e.to_string()))?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(|e| CapabilityError::Process(format!("metrics task failed: {e}")))?
            .map_err(|e| {
                CapabilityError::Workspace(format!("Failed to write {}: {}", self.path.display(), e))
            })?;

        debug!(stage = %record.stage, file = %self.path.display(), "Metrics captured");
        Ok(())
    }
}
