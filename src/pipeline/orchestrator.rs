use crate::error::{ProcessingError, Result};
use crate::models::{CleanupReport, CleanupWarning, FailureDescriptor, PipelineStatus, Stage};
use crate::pipeline::notifier::{Notifier, RunReport, StoreNotifier, TracingNotifier};
use crate::processors::{Aggregator, Cleaner, Partitioner, Transformer};
use crate::settings::Settings;
use crate::storage::{self, ObjectStore, StorageLocation};
use crate::utils::keys::KeyLayout;
use crate::utils::progress::ProgressReporter;
use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Runs the stages in order with a bounded fan-out over chunks.
///
/// Each stage entry point takes the previous status and returns an extended copy, so the stages
/// can also be driven one at a time by an external scheduler.
pub struct Pipeline {
    source: Arc<dyn ObjectStore>,
    target: Arc<dyn ObjectStore>,
    layout: KeyLayout,
    settings: Settings,
    notifiers: Vec<Arc<dyn Notifier>>,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        target: Arc<dyn ObjectStore>,
        layout: KeyLayout,
        settings: Settings,
    ) -> Self {
        Self {
            source,
            target,
            layout,
            settings,
            notifiers: Vec::new(),
            show_progress: false,
        }
    }

    /// Open the source and target stores named in the settings, reporting to the log and the
    /// target store
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let source_location = StorageLocation::parse(&settings.source)?;
        let target_location = StorageLocation::parse(&settings.target)?;

        let source = storage::open(&source_location, &settings.s3).await?;
        let target = storage::open(&target_location, &settings.s3).await?;
        let layout = KeyLayout::new(source_location.key_prefix(), target_location.key_prefix());

        let store_notifier = StoreNotifier::new(target.clone(), layout.clone());
        Ok(Self::new(source, target, layout, settings)
            .with_notifier(Arc::new(TracingNotifier))
            .with_notifier(Arc::new(store_notifier)))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    fn partitioner(&self) -> Partitioner {
        Partitioner::new(self.source.clone(), self.layout.clone())
            .with_chunk_size(self.settings.chunk_size)
            .with_retry(self.settings.retry_policy())
    }

    fn transformer(&self) -> Transformer {
        Transformer::new(self.source.clone(), self.target.clone(), self.layout.clone())
            .with_parameter(&self.settings.parameter)
            .with_retry(self.settings.retry_policy())
    }

    fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.target.clone(), self.layout.clone())
            .with_parameter(&self.settings.parameter)
            .with_output(self.settings.output.format, &self.settings.output.compression)
            .with_retry(self.settings.retry_policy())
    }

    fn cleaner(&self) -> Cleaner {
        Cleaner::new(self.target.clone(), self.layout.clone())
            .with_sweep_staging(self.settings.sweep_staging)
            .with_retry(self.settings.retry_policy())
    }

    /// Run the whole pipeline for one day. Cleanup and notification always happen.
    pub async fn run(&self, date: NaiveDate) -> PipelineStatus {
        let status = PipelineStatus::new(date);
        info!(run_id = %status.run_id, date = %date, "Starting daily summary run");

        let mut status = self.run_partition(status).await;
        if !status.is_failed() {
            status = self.run_transforms(status).await;
        }
        if !status.is_failed() {
            status = self.run_aggregate(status).await;
        }
        let status = self.run_clean(status).await;

        self.notify(&status).await;
        status
    }

    pub async fn run_partition(&self, status: PipelineStatus) -> PipelineStatus {
        let partitioner = self.partitioner();
        let fallback = status.clone();
        match with_timeout(
            Stage::Partition,
            self.settings.timeouts.partition(),
            partitioner.partition(status),
        )
        .await
        {
            Ok(status) => status,
            Err(e) => record_failure(fallback, Stage::Partition, e),
        }
    }

    /// Transform a single chunk, as one isolated stage invocation
    pub async fn run_transform(&self, status: PipelineStatus, chunk_index: usize) -> PipelineStatus {
        let transformer = self.transformer();
        let result = with_timeout(
            Stage::Transform,
            self.settings.timeouts.transform(),
            transformer.transform(&status, chunk_index),
        )
        .await
        .map_err(|e| ProcessingError::chunk(chunk_index, e));

        match result {
            Ok(extract) => status.with_extract(extract),
            Err(e) => record_failure(status, Stage::Transform, e),
        }
    }

    /// Transform every chunk with at most `map_concurrency` in flight, then join all of them
    pub async fn run_transforms(&self, mut status: PipelineStatus) -> PipelineStatus {
        let total = status.chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.map_concurrency));
        let timeout = self.settings.timeouts.transform();
        let progress = ProgressReporter::new(total as u64, "Transforming chunks", !self.show_progress);

        info!(
            chunks = total,
            concurrency = self.settings.map_concurrency,
            "Dispatching chunk transforms"
        );

        let mut handles = Vec::with_capacity(total);
        for chunk in status.chunks.iter().cloned() {
            let chunk_index = chunk.index;
            let semaphore = semaphore.clone();
            let transformer = self.transformer();
            let (date, run_id) = (status.date, status.run_id);

            let handle = tokio::spawn(async move {
                // A closed semaphore means another chunk already failed the run
                let Ok(_permit) = semaphore.clone().acquire_owned().await else {
                    return Ok(None);
                };
                let result = with_timeout(
                    Stage::Transform,
                    timeout,
                    transformer.transform_chunk(date, run_id, &chunk),
                )
                .await
                .map_err(|e| ProcessingError::chunk(chunk.index, e));

                if result.is_err() {
                    semaphore.close();
                }
                result.map(Some)
            });
            handles.push((chunk_index, handle));
        }

        // Barrier: every task is awaited, even after a failure
        let mut first_failure: Option<ProcessingError> = None;
        let mut cancelled = 0usize;
        for (done, (chunk_index, handle)) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(ProcessingError::chunk(chunk_index, join_error.into())),
            };

            match result {
                Ok(Some(extract)) => status = status.with_extract(extract),
                Ok(None) => cancelled += 1,
                Err(e) => {
                    error!(chunk = chunk_index, error = %e, "Chunk transform failed");
                    first_failure.get_or_insert(e);
                }
            }
            progress.update(done as u64 + 1);
        }
        if cancelled > 0 {
            warn!(cancelled, "Queued chunk transforms skipped after a failure");
        }

        match first_failure {
            Some(e) => {
                progress.finish_with_message("Chunk transforms failed");
                record_failure(status, Stage::Transform, e)
            }
            None => {
                progress.finish_with_message(&format!("Transformed {} chunks", total));
                status
            }
        }
    }

    pub async fn run_aggregate(&self, status: PipelineStatus) -> PipelineStatus {
        let aggregator = self.aggregator();
        let result = with_timeout(
            Stage::Aggregate,
            self.settings.timeouts.aggregate(),
            aggregator.aggregate(&status),
        )
        .await
        .map_err(ProcessingError::aggregation);

        match result {
            Ok(output) => status.with_output(output),
            Err(e) => record_failure(status, Stage::Aggregate, e),
        }
    }

    /// Cleanup never changes the run outcome; a timeout is recorded as a warning
    pub async fn run_clean(&self, status: PipelineStatus) -> PipelineStatus {
        let cleaner = self.cleaner();
        let timeout = self.settings.timeouts.clean();

        let report = match tokio::time::timeout(timeout, cleaner.clean(&status)).await {
            Ok(report) => report,
            Err(_) => {
                warn!(seconds = timeout.as_secs(), "Cleanup timed out");
                CleanupReport {
                    deleted: Vec::new(),
                    warnings: vec![CleanupWarning {
                        key: self.layout.staging_prefix(status.date, status.run_id),
                        detail: format!("cleanup timed out after {}s", timeout.as_secs()),
                    }],
                }
            }
        };

        status.with_cleanup(report)
    }

    /// Deliver the final status to every notifier; notifier errors are only logged
    pub async fn notify(&self, status: &PipelineStatus) -> RunReport {
        let report = RunReport::from_status(status);
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(status, &report).await {
                warn!(error = %e, "Notifier failed");
            }
        }
        report
    }
}

async fn with_timeout<T, F>(stage: Stage, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProcessingError::StageTimeout {
            stage,
            seconds: limit.as_secs(),
        }),
    }
}

fn record_failure(status: PipelineStatus, stage: Stage, error: ProcessingError) -> PipelineStatus {
    error!(stage = %stage, kind = ?error.kind(), error = %error, "Stage failed");
    status.with_failure(FailureDescriptor::from_error(stage, &error))
}
