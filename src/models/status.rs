use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProcessingError, Result};
use crate::models::chunk::{Chunk, ChunkCounts, ChunkExtract};
use crate::models::summary::OutputFormat;

/// Pipeline stage names as they appear in status documents and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Partition,
    Transform,
    Aggregate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Partition => "partition",
            Stage::Transform => "transform",
            Stage::Aggregate => "aggregate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoInputData,
    ChunkProcessing,
    Aggregation,
    Timeout,
    Internal,
}

/// The first failure observed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub stage: Stage,
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    pub detail: String,
}

impl FailureDescriptor {
    pub fn from_error(stage: Stage, error: &ProcessingError) -> Self {
        Self {
            stage,
            kind: error.kind(),
            chunk_index: error.chunk_index(),
            detail: error.to_string(),
        }
    }
}

/// Bookkeeping produced by the aggregator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationStats {
    pub extracts: usize,
    pub rows_read: usize,
    /// Rows whose UTC day is not the target date
    pub out_of_window: usize,
    pub invalid_values: usize,
    /// Groups that saw only invalid values and produced no row
    pub groups_without_values: usize,
}

/// Where the daily summary was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub key: String,
    pub uri: String,
    pub format: OutputFormat,
    pub rows: usize,
    #[serde(default)]
    pub stats: AggregationStats,
}

/// A cleanup delete that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupWarning {
    pub key: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Status document threaded from stage to stage.
///
/// Each stage returns an extended copy; a recorded failure is never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub extracts: Vec<ChunkExtract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupReport>,
}

impl PipelineStatus {
    pub fn new(date: NaiveDate) -> Self {
        Self::with_run_id(date, Uuid::new_v4())
    }

    pub fn with_run_id(date: NaiveDate, run_id: Uuid) -> Self {
        Self {
            run_id,
            date,
            created_at: Utc::now(),
            chunks: Vec::new(),
            extracts: Vec::new(),
            output: None,
            failure: None,
            cleanup: None,
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<Chunk>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Record an extract, replacing any earlier entry for the same chunk
    pub fn with_extract(mut self, extract: ChunkExtract) -> Self {
        self.extracts
            .retain(|existing| existing.chunk_index != extract.chunk_index);
        self.extracts.push(extract);
        self.extracts.sort_by_key(|e| e.chunk_index);
        self
    }

    pub fn with_output(mut self, output: OutputRef) -> Self {
        self.output = Some(output);
        self
    }

    /// Record a failure unless one is already present
    pub fn with_failure(mut self, failure: FailureDescriptor) -> Self {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupReport) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Fold a status returned by a parallel stage invocation of the same run into this one.
    ///
    /// Extracts are unioned, the earliest failure is kept, and output and cleanup are taken from
    /// whichever side has them.
    pub fn join(mut self, branch: PipelineStatus) -> Result<Self> {
        if branch.run_id != self.run_id || branch.date != self.date {
            return Err(ProcessingError::InvalidFormat(format!(
                "Cannot join status of run {} ({}) into run {} ({})",
                branch.run_id, branch.date, self.run_id, self.date
            )));
        }

        for extract in branch.extracts {
            if self.extract_for(extract.chunk_index).is_none() {
                self = self.with_extract(extract);
            }
        }
        if let Some(failure) = branch.failure {
            self = self.with_failure(failure);
        }
        self.output = self.output.or(branch.output);
        self.cleanup = self.cleanup.or(branch.cleanup);
        Ok(self)
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn extract_keys(&self) -> Vec<String> {
        self.extracts.iter().map(|e| e.key.clone()).collect()
    }

    pub fn extract_for(&self, chunk_index: usize) -> Option<&ChunkExtract> {
        self.extracts.iter().find(|e| e.chunk_index == chunk_index)
    }

    /// Chunk indices that have no recorded extract
    pub fn missing_chunks(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .map(|c| c.index)
            .filter(|idx| self.extract_for(*idx).is_none())
            .collect()
    }

    pub fn total_files(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    pub fn total_counts(&self) -> ChunkCounts {
        let mut total = ChunkCounts::default();
        for extract in &self.extracts {
            total.merge(&extract.counts);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn extract(idx: usize, written: usize) -> ChunkExtract {
        ChunkExtract {
            chunk_index: idx,
            key: format!("staging/chunk-{:04}.parquet", idx),
            counts: ChunkCounts {
                written,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_first_failure_wins() {
        let status = PipelineStatus::new(date())
            .with_failure(FailureDescriptor {
                stage: Stage::Transform,
                kind: FailureKind::ChunkProcessing,
                chunk_index: Some(2),
                detail: "first".to_string(),
            })
            .with_failure(FailureDescriptor {
                stage: Stage::Aggregate,
                kind: FailureKind::Aggregation,
                chunk_index: None,
                detail: "second".to_string(),
            });

        let failure = status.failure.unwrap();
        assert_eq!(failure.stage, Stage::Transform);
        assert_eq!(failure.detail, "first");
    }

    #[test]
    fn test_missing_chunks_and_replacement() {
        let chunks = (0..3).map(|i| Chunk::new(i, vec![format!("f{}", i)])).collect();
        let status = PipelineStatus::new(date())
            .with_chunks(chunks)
            .with_extract(extract(2, 5))
            .with_extract(extract(0, 1))
            .with_extract(extract(2, 7));

        assert_eq!(status.missing_chunks(), vec![1]);
        assert_eq!(status.extracts.len(), 2);
        assert_eq!(status.extracts[0].chunk_index, 0);
        assert_eq!(status.total_counts().written, 8);
        assert_eq!(status.total_files(), 3);
    }

    #[test]
    fn test_join_parallel_branches() -> Result<()> {
        let chunks = (0..3).map(|i| Chunk::new(i, vec![format!("f{}", i)])).collect();
        let base = PipelineStatus::new(date()).with_chunks(chunks);

        let failure = FailureDescriptor {
            stage: Stage::Transform,
            kind: FailureKind::ChunkProcessing,
            chunk_index: Some(1),
            detail: "boom".to_string(),
        };
        let joined = base
            .clone()
            .with_extract(extract(0, 2))
            .join(base.clone().with_failure(failure.clone()))?
            .join(base.clone().with_extract(extract(2, 4)))?;

        assert_eq!(joined.missing_chunks(), vec![1]);
        assert_eq!(joined.total_counts().written, 6);
        assert_eq!(joined.failure, Some(failure));

        let other_run = PipelineStatus::new(date());
        assert!(matches!(
            joined.join(other_run),
            Err(ProcessingError::InvalidFormat(_))
        ));
        Ok(())
    }

    #[test]
    fn test_status_json_round_trip() -> crate::error::Result<()> {
        let status = PipelineStatus::new(date())
            .with_chunks(vec![Chunk::new(0, vec!["a.ndjson".to_string()])])
            .with_extract(extract(0, 3));

        let json = serde_json::to_string(&status)?;
        assert!(!json.contains("failure"));
        let parsed: PipelineStatus = serde_json::from_str(&json)?;
        assert_eq!(parsed, status);
        Ok(())
    }

    #[test]
    fn test_stage_serialisation() -> crate::error::Result<()> {
        assert_eq!(serde_json::to_string(&Stage::Transform)?, "\"transform\"");
        assert_eq!(
            serde_json::to_string(&FailureKind::NoInputData)?,
            "\"no_input_data\""
        );
        Ok(())
    }
}
