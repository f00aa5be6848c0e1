use crate::error::{ProcessingError, Result};
use crate::models::{Chunk, PipelineStatus};
use crate::storage::ObjectStore;
use crate::utils::constants::DEFAULT_CHUNK_SIZE;
use crate::utils::keys::{is_raw_input_key, KeyLayout};
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, info};

/// Lists a day's raw input files and groups them into balanced chunks
pub struct Partitioner {
    source: Arc<dyn ObjectStore>,
    layout: KeyLayout,
    chunk_size: usize,
    retry: RetryPolicy,
}

impl Partitioner {
    pub fn new(source: Arc<dyn ObjectStore>, layout: KeyLayout) -> Self {
        Self {
            source,
            layout,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach the chunk manifest for `status.date` to the status
    #[tracing::instrument(level = "DEBUG", skip_all, fields(run_id = %status.run_id, date = %status.date))]
    pub async fn partition(&self, status: PipelineStatus) -> Result<PipelineStatus> {
        let prefix = self.layout.raw_prefix(status.date);

        let listed = retry_with_backoff(&self.retry, "list", || self.source.list(&prefix)).await?;
        let listed_count = listed.len();

        let mut keys: Vec<String> = listed
            .into_iter()
            .filter(|k| is_raw_input_key(k))
            .collect();
        keys.sort();
        keys.dedup();

        debug!(
            prefix = %prefix,
            listed = listed_count,
            recognised = keys.len(),
            "Listed raw input"
        );

        if keys.is_empty() {
            return Err(ProcessingError::NoInputData {
                date: status.date,
                prefix,
            });
        }

        let file_count = keys.len();
        let chunks = split_into_chunks(keys, self.chunk_size);
        info!(
            files = file_count,
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            "Partitioned raw input"
        );

        Ok(status.with_chunks(chunks))
    }
}

/// Split `keys` into `ceil(len / chunk_size)` contiguous chunks whose sizes differ by at most one
pub fn split_into_chunks(keys: Vec<String>, chunk_size: usize) -> Vec<Chunk> {
    if keys.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let count = keys.len().div_ceil(chunk_size);
    let base = keys.len() / count;
    let extra = keys.len() % count;

    let mut remaining = keys.into_iter();
    (0..count)
        .map(|index| {
            let size = if index < extra { base + 1 } else { base };
            Chunk::new(index, remaining.by_ref().take(size).collect())
        })
        .collect()
}
