use crate::models::{CleanupReport, CleanupWarning, PipelineStatus};
use crate::storage::ObjectStore;
use crate::utils::keys::KeyLayout;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Best-effort removal of a run's intermediate extracts
pub struct Cleaner {
    target: Arc<dyn ObjectStore>,
    layout: KeyLayout,
    sweep_staging: bool,
    retry: RetryPolicy,
}

impl Cleaner {
    pub fn new(target: Arc<dyn ObjectStore>, layout: KeyLayout) -> Self {
        Self {
            target,
            layout,
            sweep_staging: true,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_sweep_staging(mut self, sweep_staging: bool) -> Self {
        self.sweep_staging = sweep_staging;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Delete every extract the status references, plus leftovers under the run's staging prefix.
    ///
    /// Never fails: each delete that still fails after retries becomes a warning.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(run_id = %status.run_id, date = %status.date))]
    pub async fn clean(&self, status: &PipelineStatus) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut keys: BTreeSet<String> = status.extract_keys().into_iter().collect();

        if self.sweep_staging {
            let prefix = self.layout.staging_prefix(status.date, status.run_id);
            match retry_with_backoff(&self.retry, "list", || self.target.list(&prefix)).await {
                Ok(leftovers) => keys.extend(leftovers),
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "Could not list staging prefix");
                    report.warnings.push(CleanupWarning {
                        key: prefix,
                        detail: e.to_string(),
                    });
                }
            }
        }

        for key in keys {
            match retry_with_backoff(&self.retry, "delete", || self.target.delete(&key)).await {
                Ok(()) => report.deleted.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete extract");
                    report.warnings.push(CleanupWarning {
                        key,
                        detail: e.to_string(),
                    });
                }
            }
        }

        info!(
            deleted = report.deleted.len(),
            warnings = report.warnings.len(),
            "Cleanup finished"
        );
        report
    }
}
