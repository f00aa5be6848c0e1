use crate::error::Result;
use crate::models::PipelineStatus;
use crate::storage::ObjectStore;
use crate::utils::keys::KeyLayout;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{error, info};

/// Human readable end-of-run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub subject: String,
    pub body: String,
    pub success: bool,
}

impl RunReport {
    pub fn from_status(status: &PipelineStatus) -> Self {
        let mut body = String::new();
        let _ = writeln!(body, "Run:      {}", status.run_id);
        let _ = writeln!(body, "Date:     {}", status.date);
        let _ = writeln!(
            body,
            "Chunks:   {} ({} files)",
            status.chunks.len(),
            status.total_files()
        );

        let counts = status.total_counts();
        let _ = writeln!(
            body,
            "Records:  {} parsed, {} skipped, {} filtered, {} duplicates, {} staged",
            counts.parsed, counts.skipped, counts.filtered, counts.duplicates, counts.written
        );

        let subject = match &status.failure {
            None => {
                if let Some(output) = &status.output {
                    let _ = writeln!(body, "Output:   {} ({} rows)", output.uri, output.rows);
                }
                format!("Air quality summary for {} succeeded", status.date)
            }
            Some(failure) => {
                let _ = writeln!(body, "Stage:    {}", failure.stage);
                let _ = writeln!(body, "Error:    {:?}", failure.kind);
                if let Some(chunk) = failure.chunk_index {
                    let _ = writeln!(body, "Chunk:    {}", chunk);
                }
                let _ = writeln!(body, "Detail:   {}", failure.detail);
                format!(
                    "Air quality summary for {} failed during {}",
                    status.date, failure.stage
                )
            }
        };

        if let Some(cleanup) = &status.cleanup {
            let _ = writeln!(
                body,
                "Cleanup:  {} deleted, {} warnings",
                cleanup.deleted.len(),
                cleanup.warnings.len()
            );
            for warning in &cleanup.warnings {
                let _ = writeln!(body, "  - {}: {}", warning.key, warning.detail);
            }
        }

        Self {
            subject,
            body,
            success: status.failure.is_none(),
        }
    }
}

/// Receives the final status of every run
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, status: &PipelineStatus, report: &RunReport) -> Result<()>;
}

/// Emits the report as a log line
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, status: &PipelineStatus, report: &RunReport) -> Result<()> {
        if report.success {
            info!(run_id = %status.run_id, "{}\n{}", report.subject, report.body);
        } else {
            error!(run_id = %status.run_id, "{}\n{}", report.subject, report.body);
        }
        Ok(())
    }
}

/// Persists the report and final status as JSON next to the daily output
pub struct StoreNotifier {
    target: Arc<dyn ObjectStore>,
    layout: KeyLayout,
}

#[derive(Serialize)]
struct StoredReport<'a> {
    report: &'a RunReport,
    status: &'a PipelineStatus,
}

impl StoreNotifier {
    pub fn new(target: Arc<dyn ObjectStore>, layout: KeyLayout) -> Self {
        Self { target, layout }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn notify(&self, status: &PipelineStatus, report: &RunReport) -> Result<()> {
        let key = self.layout.report_key(status.date, status.run_id);
        let body = serde_json::to_vec_pretty(&StoredReport { report, status })?;
        self.target.put(&key, Bytes::from(body)).await?;
        info!(key = %key, "Stored run report");
        Ok(())
    }
}
