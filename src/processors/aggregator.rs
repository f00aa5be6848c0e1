use crate::error::{ProcessingError, Result};
use crate::models::{
    AggregationStats, DailyAccumulator, DailySummaryRow, GroupKey, OutputFormat, OutputRef,
    PipelineStatus,
};
use crate::readers::ExtractReader;
use crate::storage::ObjectStore;
use crate::utils::constants::DEFAULT_PARAMETER;
use crate::utils::keys::KeyLayout;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use crate::writers::SummaryWriter;
use bytes::Bytes;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Running per-location accumulators for one target day
#[derive(Debug, Clone)]
pub struct DailyTable {
    date: NaiveDate,
    groups: BTreeMap<GroupKey, DailyAccumulator>,
    stats: AggregationStats,
}

impl DailyTable {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            groups: BTreeMap::new(),
            stats: AggregationStats::default(),
        }
    }

    /// Fold one decoded extract into the table
    pub fn fold_extract(&mut self, body: Bytes) -> Result<()> {
        let reader = ExtractReader::new();
        let date = self.date;
        let groups = &mut self.groups;
        let stats = &mut self.stats;

        let rows = reader.for_each_record(body, |record| {
            if record.date() != date {
                stats.out_of_window += 1;
                return;
            }
            groups
                .entry(record.group_key())
                .or_default()
                .push(record.valid_value(), &record.unit);
        })?;

        self.stats.extracts += 1;
        self.stats.rows_read += rows;
        Ok(())
    }

    /// Summary rows ordered by (location, city, country); groups without valid values are dropped
    pub fn finish(mut self, parameter: &str) -> (Vec<DailySummaryRow>, AggregationStats) {
        let mut rows = Vec::with_capacity(self.groups.len());
        for (key, acc) in self.groups {
            self.stats.invalid_values += acc.invalid() as usize;
            match acc.finish(self.date, key, parameter) {
                Some(row) => rows.push(row),
                None => self.stats.groups_without_values += 1,
            }
        }
        (rows, self.stats)
    }
}

/// Merges every staged extract into the daily summary file
pub struct Aggregator {
    target: Arc<dyn ObjectStore>,
    layout: KeyLayout,
    parameter: String,
    format: OutputFormat,
    compression: String,
    retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(target: Arc<dyn ObjectStore>, layout: KeyLayout) -> Self {
        Self {
            target,
            layout,
            parameter: DEFAULT_PARAMETER.to_string(),
            format: OutputFormat::Parquet,
            compression: "snappy".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_parameter(mut self, parameter: &str) -> Self {
        self.parameter = parameter.trim().to_lowercase();
        self
    }

    pub fn with_output(mut self, format: OutputFormat, compression: &str) -> Self {
        self.format = format;
        self.compression = compression.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Produce the daily summary. Any failure is reported as `Aggregation`.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(run_id = %status.run_id, date = %status.date))]
    pub async fn aggregate(&self, status: &PipelineStatus) -> Result<OutputRef> {
        self.run(status).await.map_err(ProcessingError::aggregation)
    }

    async fn run(&self, status: &PipelineStatus) -> Result<OutputRef> {
        if let Some(&chunk_index) = status.missing_chunks().first() {
            return Err(ProcessingError::MissingExtract { chunk_index });
        }
        let writer = SummaryWriter::new(self.format).with_compression(&self.compression)?;

        // One extract in memory at a time
        let mut table = DailyTable::new(status.date);
        for extract in &status.extracts {
            let body =
                retry_with_backoff(&self.retry, "get", || self.target.get(&extract.key)).await?;
            debug!(chunk = extract.chunk_index, bytes = body.len(), "Folding extract");

            table = tokio::task::spawn_blocking(move || -> Result<DailyTable> {
                table.fold_extract(body)?;
                Ok(table)
            })
            .await??;
        }

        let parameter = self.parameter.clone();
        let (rows, stats) = table.finish(&parameter);
        let encoded = writer.to_bytes(&rows)?;

        let key = self.layout.output_key(status.date, self.format);
        retry_with_backoff(&self.retry, "put", || self.target.put(&key, encoded.clone())).await?;

        info!(
            key = %key,
            rows = rows.len(),
            extracts = stats.extracts,
            rows_read = stats.rows_read,
            out_of_window = stats.out_of_window,
            invalid_values = stats.invalid_values,
            "Daily summary written"
        );

        Ok(OutputRef {
            uri: self.target.describe(&key),
            key,
            format: self.format,
            rows: rows.len(),
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkCounts, ChunkExtract, FailureKind, RawRecord};
    use crate::storage::MemoryObjectStore;
    use crate::writers::{read_summary, ExtractWriter};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn record(location: &str, day: u32, hour: u32, value: Option<f64>) -> RawRecord {
        RawRecord::new(
            Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap(),
            location.to_string(),
            "London".to_string(),
            "GB".to_string(),
            "pm25".to_string(),
            value,
            "µg/m³".to_string(),
        )
    }

    /// Stage each record list as one extract and return the status referencing them
    fn stage(store: &MemoryObjectStore, extracts: Vec<Vec<RawRecord>>) -> PipelineStatus {
        let mut status = PipelineStatus::new(date()).with_chunks(
            (0..extracts.len())
                .map(|i| Chunk::new(i, vec![format!("raw/{}.ndjson", i)]))
                .collect(),
        );
        for (i, records) in extracts.into_iter().enumerate() {
            let key = format!("out/staging/chunk-{:04}.parquet", i);
            store.insert(&key, ExtractWriter::new().to_bytes(&records).unwrap());
            status = status.with_extract(ChunkExtract {
                chunk_index: i,
                key,
                counts: ChunkCounts::default(),
            });
        }
        status
    }

    fn aggregator(store: &MemoryObjectStore) -> Aggregator {
        Aggregator::new(Arc::new(store.clone()), KeyLayout::new("raw", "out"))
    }

    #[tokio::test]
    async fn test_hourly_values_across_extracts() -> Result<()> {
        let store = MemoryObjectStore::new();
        let first: Vec<RawRecord> = (0..12).map(|h| record("A", 15, h, Some(h as f64 + 1.0))).collect();
        let second: Vec<RawRecord> = (12..24).map(|h| record("A", 15, h, Some(h as f64 + 1.0))).collect();
        let status = stage(&store, vec![first, second]);

        let output = aggregator(&store).aggregate(&status).await?;
        assert_eq!(output.key, "out/daily/2024-01-15.parquet");
        assert_eq!(output.rows, 1);
        assert_eq!(output.stats.extracts, 2);

        let rows = read_summary(OutputFormat::Parquet, store.read(&output.key).unwrap())?;
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].min, rows[0].max, rows[0].mean), (1.0, 24.0, 12.5));
        assert_eq!(rows[0].count, 24);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_values_and_other_days() -> Result<()> {
        let store = MemoryObjectStore::new();
        let status = stage(
            &store,
            vec![vec![
                record("OnlyInvalid", 15, 0, None),
                record("OnlyInvalid", 15, 1, Some(-999.0)),
                record("Mixed", 15, 0, Some(7.0)),
                record("Mixed", 15, 1, None),
                record("Mixed", 16, 0, Some(100.0)),
                record("Zed", 14, 23, Some(3.0)),
            ]],
        );

        let output = aggregator(&store)
            .with_output(OutputFormat::CsvGzip, "snappy")
            .aggregate(&status)
            .await?;
        assert_eq!(output.key, "out/daily/2024-01-15.csv.gz");
        assert_eq!(output.stats.out_of_window, 2);
        assert_eq!(output.stats.groups_without_values, 1);
        assert_eq!(output.stats.invalid_values, 3);

        let rows = read_summary(OutputFormat::CsvGzip, store.read(&output.key).unwrap())?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location, "Mixed");
        assert_eq!((rows[0].min, rows[0].max, rows[0].mean), (7.0, 7.0, 7.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_rows_are_ordered_by_location() -> Result<()> {
        let store = MemoryObjectStore::new();
        let status = stage(
            &store,
            vec![
                vec![record("Westminster", 15, 1, Some(1.0))],
                vec![record("Camden", 15, 1, Some(2.0)), record("Hackney", 15, 2, Some(3.0))],
            ],
        );

        let output = aggregator(&store).aggregate(&status).await?;
        let rows = read_summary(OutputFormat::Parquet, store.read(&output.key).unwrap())?;
        let locations: Vec<&str> = rows.iter().map(|r| r.location.as_str()).collect();
        assert_eq!(locations, vec!["Camden", "Hackney", "Westminster"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_extract_fails_without_output() {
        let store = MemoryObjectStore::new();
        let status = stage(&store, vec![vec![record("A", 15, 0, Some(1.0))]])
            .with_chunks(vec![Chunk::new(0, vec![]), Chunk::new(1, vec![])]);

        let err = aggregator(&store).aggregate(&status).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Aggregation);
        assert!(!store.contains("out/daily/2024-01-15.parquet"));
    }

    #[tokio::test]
    async fn test_unreadable_extract_is_aggregation_failure() {
        let store = MemoryObjectStore::new();
        let status = stage(&store, vec![vec![record("A", 15, 0, Some(1.0))]]);
        store.insert("out/staging/chunk-0000.parquet", "garbage");

        let err = aggregator(&store).aggregate(&status).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Aggregation);
        assert!(!store.contains("out/daily/2024-01-15.parquet"));
    }
}
