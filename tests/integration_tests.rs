use aq_processor::error::Result;
use aq_processor::models::{FailureKind, OutputFormat, PipelineStatus, Stage};
use aq_processor::pipeline::{Pipeline, StoreNotifier};
use aq_processor::settings::Settings;
use aq_processor::storage::{ListPage, MemoryObjectStore, ObjectStore, StorageError};
use aq_processor::utils::KeyLayout;
use aq_processor::writers::{read_summary, read_summary_file};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use flate2::write::GzEncoder;
use flate2::Compression;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FILES: usize = 144;
const LOCATIONS: usize = 6;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn raw_key(i: usize) -> String {
    format!("realtime/2024-01-15/{:04}.ndjson", i)
}

/// One fetch file per (hour, station): hour `i / 6`, station `i % 6`, value `hour + 1`.
/// Every file also carries an NO2 reading and a malformed line.
fn fetch_file(i: usize) -> String {
    let hour = i / LOCATIONS;
    let station = i % LOCATIONS;
    let measurement = |parameter: &str, value: f64| {
        format!(
            r#"{{"date":{{"utc":"2024-01-15T{:02}:00:00.000Z","local":"2024-01-15T{:02}:00:00+00:00"}},"parameter":"{}","value":{},"unit":"µg/m³","location":"Station {}","city":"London","country":"GB"}}"#,
            hour, hour, parameter, value, station
        )
    };

    format!(
        "{}\n{}\n{{\"truncated\": \n",
        measurement("pm25", hour as f64 + 1.0),
        measurement("no2", 40.0)
    )
}

fn seeded_store(page_size: usize) -> MemoryObjectStore {
    let store = MemoryObjectStore::new().with_page_size(page_size);
    for i in 0..FILES {
        store.insert(&raw_key(i), fetch_file(i));
    }
    // Noise that must not be picked up
    store.insert("realtime/2024-01-15/_manifest.txt", "ignore me");
    store.insert("realtime/2024-01-16/0000.ndjson", fetch_file(0));
    store
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.chunk_size = 24;
    settings.map_concurrency = 3;
    settings.retry.initial_backoff_ms = 1;
    settings.retry.max_backoff_ms = 4;
    settings
}

fn pipeline(store: Arc<dyn ObjectStore>, settings: Settings) -> Pipeline {
    let layout = KeyLayout::new("realtime", "summaries");
    Pipeline::new(store.clone(), store.clone(), layout.clone(), settings)
        .with_notifier(Arc::new(StoreNotifier::new(store, layout)))
}

fn stored_report(store: &MemoryObjectStore, status: &PipelineStatus) -> serde_json::Value {
    let key = KeyLayout::new("realtime", "summaries").report_key(status.date, status.run_id);
    let body = store.read(&key).expect("report stored");
    serde_json::from_slice(&body).expect("report is JSON")
}

/// Wraps a store and records the peak number of concurrent `get` calls
struct ConcurrencyProbe {
    inner: MemoryObjectStore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ObjectStore for ConcurrencyProbe {
    fn describe(&self, key: &str) -> String {
        self.inner.describe(key)
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> std::result::Result<ListPage, StorageError> {
        self.inner.list_page(prefix, continuation).await
    }

    async fn get(&self, key: &str) -> std::result::Result<Bytes, StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let result = self.inner.get(key).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn put(&self, key: &str, body: Bytes) -> std::result::Result<(), StorageError> {
        self.inner.put(key, body).await
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

/// Wraps a store and slows down or corrupts the objects whose key contains a marker
#[derive(Default)]
struct FaultyStore {
    inner: MemoryObjectStore,
    slow_get: Option<&'static str>,
    corrupt_get: Option<&'static str>,
    slow_delete: bool,
}

const STALL: Duration = Duration::from_secs(5);

#[async_trait]
impl ObjectStore for FaultyStore {
    fn describe(&self, key: &str) -> String {
        self.inner.describe(key)
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> std::result::Result<ListPage, StorageError> {
        self.inner.list_page(prefix, continuation).await
    }

    async fn get(&self, key: &str) -> std::result::Result<Bytes, StorageError> {
        if self.slow_get.is_some_and(|marker| key.contains(marker)) {
            tokio::time::sleep(STALL).await;
        }
        if self.corrupt_get.is_some_and(|marker| key.contains(marker)) {
            return Ok(Bytes::from_static(b"definitely not parquet"));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, body: Bytes) -> std::result::Result<(), StorageError> {
        self.inner.put(key, body).await
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
        if self.slow_delete {
            tokio::time::sleep(STALL).await;
        }
        self.inner.delete(key).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_daily_summary() -> Result<()> {
    let store = seeded_store(10);
    let probe = Arc::new(ConcurrencyProbe {
        inner: store.clone(),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });

    let status = pipeline(probe.clone(), settings()).run(date()).await;

    assert!(status.failure.is_none(), "run failed: {:?}", status.failure);
    assert_eq!(status.chunks.len(), 6);
    assert!(status.chunks.iter().all(|c| c.len() == 24));
    assert_eq!(status.extracts.len(), 6);

    let counts = status.total_counts();
    assert_eq!(counts.files, FILES);
    assert_eq!(counts.parsed, FILES * 2);
    assert_eq!(counts.filtered, FILES);
    assert_eq!(counts.skipped, FILES);
    assert_eq!(counts.written, FILES);

    // Bounded fan-out; each chunk fetches sequentially, so the peak is the chunk parallelism
    let peak = probe.peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak concurrency {}", peak);

    let output = status.output.clone().expect("output recorded");
    assert_eq!(output.key, "summaries/daily/2024-01-15.parquet");
    assert_eq!(output.rows, LOCATIONS);

    let rows = read_summary(OutputFormat::Parquet, store.read(&output.key).unwrap())?;
    assert_eq!(rows.len(), LOCATIONS);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row.location, format!("Station {}", i));
        assert_eq!(row.parameter, "pm25");
        assert_eq!((row.min, row.max, row.mean, row.count), (1.0, 24.0, 12.5, 24));
    }

    let cleanup = status.cleanup.clone().expect("cleanup ran");
    assert_eq!(cleanup.deleted.len(), 6);
    assert!(cleanup.warnings.is_empty());
    assert!(store.keys_with_prefix("summaries/staging/").is_empty());

    let report = stored_report(&store, &status);
    assert_eq!(report["report"]["success"], true);
    assert!(report["report"]["body"]
        .as_str()
        .unwrap_or_default()
        .contains("memory://summaries/daily/2024-01-15.parquet"));
    Ok(())
}

#[tokio::test]
async fn test_chunk_failure_skips_aggregation_and_cleans_up() {
    let store = seeded_store(1000);
    // File 50 belongs to chunk 2
    store.fail_get_always(&raw_key(50));

    let status = pipeline(Arc::new(store.clone()), settings()).run(date()).await;

    let failure = status.failure.clone().expect("run failed");
    assert_eq!(failure.stage, Stage::Transform);
    assert_eq!(failure.kind, FailureKind::ChunkProcessing);
    assert_eq!(failure.chunk_index, Some(2));

    assert_eq!(status.extracts.len(), 5);
    assert!(status.output.is_none());
    assert!(!store.contains("summaries/daily/2024-01-15.parquet"));

    let cleanup = status.cleanup.clone().expect("cleanup ran");
    assert_eq!(cleanup.deleted.len(), 5);
    assert!(store.keys_with_prefix("summaries/staging/").is_empty());

    let report = stored_report(&store, &status);
    assert_eq!(report["report"]["success"], false);
    assert!(report["report"]["subject"]
        .as_str()
        .unwrap_or_default()
        .contains("failed during transform"));
}

#[tokio::test]
async fn test_aggregation_failure_still_cleans_and_reports() {
    let store = seeded_store(1000);
    let faulty = Arc::new(FaultyStore {
        inner: store.clone(),
        corrupt_get: Some("/staging/"),
        ..Default::default()
    });

    let status = pipeline(faulty, settings()).run(date()).await;

    let failure = status.failure.clone().expect("run failed");
    assert_eq!(failure.stage, Stage::Aggregate);
    assert_eq!(failure.kind, FailureKind::Aggregation);
    assert!(status.output.is_none());
    assert!(!store.contains("summaries/daily/2024-01-15.parquet"));

    assert_eq!(status.cleanup.as_ref().map(|c| c.deleted.len()), Some(6));
    assert!(store.keys_with_prefix("summaries/staging/").is_empty());

    let report = stored_report(&store, &status);
    assert_eq!(report["report"]["success"], false);
    assert!(report["report"]["subject"]
        .as_str()
        .unwrap_or_default()
        .contains("failed during aggregate"));
}

#[tokio::test]
async fn test_aggregation_timeout_is_aggregation_failure() {
    let store = seeded_store(1000);
    let faulty = Arc::new(FaultyStore {
        inner: store.clone(),
        slow_get: Some("/staging/"),
        ..Default::default()
    });
    let mut settings = settings();
    settings.timeouts.aggregate_secs = 1;

    let status = pipeline(faulty, settings).run(date()).await;

    let failure = status.failure.clone().expect("run failed");
    assert_eq!(failure.stage, Stage::Aggregate);
    assert_eq!(failure.kind, FailureKind::Aggregation);
    assert!(failure.detail.contains("timed out"), "{}", failure.detail);
    assert_eq!(status.cleanup.map(|c| c.deleted.len()), Some(6));
}

#[tokio::test]
async fn test_chunk_timeout_is_chunk_failure() {
    let store = seeded_store(1000);
    // File 50 belongs to chunk 2
    let faulty = Arc::new(FaultyStore {
        inner: store.clone(),
        slow_get: Some("/0050.ndjson"),
        ..Default::default()
    });
    let mut settings = settings();
    settings.timeouts.transform_secs = 1;

    let status = pipeline(faulty, settings).run(date()).await;

    let failure = status.failure.clone().expect("run failed");
    assert_eq!(failure.stage, Stage::Transform);
    assert_eq!(failure.kind, FailureKind::ChunkProcessing);
    assert_eq!(failure.chunk_index, Some(2));
    assert!(failure.detail.contains("timed out"), "{}", failure.detail);

    assert!(status.extract_for(2).is_none());
    assert!(status.output.is_none());
    let cleanup = status.cleanup.clone().expect("cleanup ran");
    assert_eq!(cleanup.deleted.len(), status.extracts.len());
    assert!(store.keys_with_prefix("summaries/staging/").is_empty());
}

#[tokio::test]
async fn test_cleanup_timeout_is_warning() {
    let store = seeded_store(1000);
    let faulty = Arc::new(FaultyStore {
        inner: store.clone(),
        slow_delete: true,
        ..Default::default()
    });
    let mut settings = settings();
    settings.timeouts.clean_secs = 1;

    let status = pipeline(faulty, settings).run(date()).await;

    assert!(status.failure.is_none(), "run failed: {:?}", status.failure);
    assert!(store.contains("summaries/daily/2024-01-15.parquet"));

    let cleanup = status.cleanup.clone().expect("cleanup ran");
    assert!(cleanup.deleted.is_empty());
    assert_eq!(cleanup.warnings.len(), 1);
    assert!(cleanup.warnings[0].detail.contains("timed out"));

    let report = stored_report(&store, &status);
    assert_eq!(report["report"]["success"], true);
}

#[tokio::test]
async fn test_transient_fetch_failures_are_retried() {
    let store = seeded_store(1000);
    store.fail_get(&raw_key(7), 2);
    store.fail_get(&raw_key(100), 1);

    let status = pipeline(Arc::new(store.clone()), settings()).run(date()).await;

    assert!(status.failure.is_none(), "run failed: {:?}", status.failure);
    assert_eq!(status.output.map(|o| o.rows), Some(LOCATIONS));
}

#[tokio::test]
async fn test_missing_day_reports_no_input_data() {
    let store = seeded_store(1000);
    let status = pipeline(Arc::new(store.clone()), settings())
        .run(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
        .await;

    let failure = status.failure.clone().expect("run failed");
    assert_eq!(failure.stage, Stage::Partition);
    assert_eq!(failure.kind, FailureKind::NoInputData);
    assert!(status.chunks.is_empty());
    assert_eq!(status.cleanup.map(|c| c.deleted.len()), Some(0));
}

#[tokio::test]
async fn test_local_directories_with_gzip_and_csv_output() -> Result<()> {
    let dir = TempDir::new()?;
    let raw_dir = dir.path().join("raw").join("2024-01-15");
    std::fs::create_dir_all(&raw_dir)?;

    for i in 0..30 {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(fetch_file(i).as_bytes())?;
        std::fs::write(raw_dir.join(format!("{:04}.ndjson.gz", i)), encoder.finish()?)?;
    }

    let mut settings = settings();
    settings.source = dir.path().join("raw").to_string_lossy().into_owned();
    settings.target = format!("file://{}", dir.path().join("out").display());
    settings.chunk_size = 7;
    settings.output.format = OutputFormat::CsvGzip;

    let status = Pipeline::from_settings(settings).await?.run(date()).await;
    assert!(status.failure.is_none(), "run failed: {:?}", status.failure);
    assert_eq!(status.chunks.len(), 5);

    let (info, rows) = read_summary_file(&dir.path().join("out/daily/2024-01-15.csv.gz"))?;
    assert_eq!(info.total_rows, LOCATIONS);
    // 30 files cover hours 0..=4
    assert_eq!((rows[0].min, rows[0].max, rows[0].count), (1.0, 5.0, 5));

    let staging = dir.path().join("out/staging");
    let leftovers = walk_files(&staging);
    assert!(leftovers.is_empty(), "staging not cleaned: {:?}", leftovers);
    assert!(dir.path().join("out/reports/2024-01-15").exists());
    Ok(())
}

fn walk_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(walk_files(&path));
            } else {
                files.push(path);
            }
        }
    }
    files
}
