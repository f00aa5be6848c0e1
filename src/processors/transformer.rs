use crate::error::{ProcessingError, Result};
use crate::models::{Chunk, ChunkCounts, ChunkExtract, DedupKey, PipelineStatus, RawRecord};
use crate::readers::{ParsedFile, RawReader};
use crate::storage::ObjectStore;
use crate::utils::constants::DEFAULT_PARAMETER;
use crate::utils::keys::KeyLayout;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use crate::writers::ExtractWriter;
use bytes::Bytes;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Turns one chunk of raw files into a normalised, deduplicated Parquet extract
#[derive(Clone)]
pub struct Transformer {
    source: Arc<dyn ObjectStore>,
    target: Arc<dyn ObjectStore>,
    layout: KeyLayout,
    parameter: String,
    retry: RetryPolicy,
}

impl Transformer {
    pub fn new(source: Arc<dyn ObjectStore>, target: Arc<dyn ObjectStore>, layout: KeyLayout) -> Self {
        Self {
            source,
            target,
            layout,
            parameter: DEFAULT_PARAMETER.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_parameter(mut self, parameter: &str) -> Self {
        self.parameter = parameter.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Transform the chunk with index `chunk_index` from the status manifest
    pub async fn transform(&self, status: &PipelineStatus, chunk_index: usize) -> Result<ChunkExtract> {
        let chunk = status
            .chunks
            .iter()
            .find(|c| c.index == chunk_index)
            .ok_or_else(|| {
                ProcessingError::chunk(
                    chunk_index,
                    ProcessingError::Config(format!("No chunk {} in the manifest", chunk_index)),
                )
            })?;

        self.transform_chunk(status.date, status.run_id, chunk).await
    }

    /// Fetch, parse, deduplicate and stage one chunk. Every error names the chunk.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(chunk = chunk.index, files = chunk.len()))]
    pub async fn transform_chunk(
        &self,
        date: NaiveDate,
        run_id: Uuid,
        chunk: &Chunk,
    ) -> Result<ChunkExtract> {
        self.run(date, run_id, chunk)
            .await
            .map_err(|e| ProcessingError::chunk(chunk.index, e))
    }

    async fn run(&self, date: NaiveDate, run_id: Uuid, chunk: &Chunk) -> Result<ChunkExtract> {
        let mut bodies: Vec<(String, Bytes)> = Vec::with_capacity(chunk.len());
        for key in &chunk.keys {
            let body = retry_with_backoff(&self.retry, "get", || self.source.get(key)).await?;
            bodies.push((key.clone(), body));
        }

        let parameter = self.parameter.clone();
        let (encoded, counts) = tokio::task::spawn_blocking(move || {
            let reader = RawReader::new(&parameter);
            let parsed = bodies
                .par_iter()
                .map(|(key, body)| reader.read_bytes(key, body))
                .collect::<Result<Vec<ParsedFile>>>()?;
            let (records, mut counts) = deduplicate(parsed);
            let encoded = ExtractWriter::new().to_bytes(&records)?;
            counts.files = bodies.len();
            Ok::<_, ProcessingError>((encoded, counts))
        })
        .await??;

        let key = self.layout.extract_key(date, run_id, chunk.index);
        retry_with_backoff(&self.retry, "put", || self.target.put(&key, encoded.clone())).await?;

        info!(
            chunk = chunk.index,
            files = counts.files,
            parsed = counts.parsed,
            skipped = counts.skipped,
            filtered = counts.filtered,
            duplicates = counts.duplicates,
            written = counts.written,
            "Chunk staged"
        );
        debug!(key = %key, bytes = encoded.len(), "Wrote extract");

        Ok(ChunkExtract {
            chunk_index: chunk.index,
            key,
            counts,
        })
    }
}

/// Merge parsed files in order, keeping the last record for each (timestamp, location, parameter).
///
/// Returned records are sorted by location then timestamp.
pub fn deduplicate(files: Vec<ParsedFile>) -> (Vec<RawRecord>, ChunkCounts) {
    let mut counts = ChunkCounts::default();
    let mut latest: HashMap<DedupKey, RawRecord> = HashMap::new();

    for file in files {
        counts.parsed += file.parsed;
        counts.skipped += file.skipped;
        counts.filtered += file.filtered;
        for record in file.records {
            if latest.insert(record.dedup_key(), record).is_some() {
                counts.duplicates += 1;
            }
        }
    }

    let mut records: Vec<RawRecord> = latest.into_values().collect();
    records.sort_by(|a, b| {
        a.location
            .cmp(&b.location)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
    counts.written = records.len();

    (records, counts)
}
