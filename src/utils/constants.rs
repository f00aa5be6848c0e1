/// Raw input file extensions recognised by the partitioner
pub const RAW_EXTENSIONS: &[&str] = &[".ndjson", ".jsonl", ".json"];
pub const GZIP_EXTENSION: &str = ".gz";

/// Key layout below the target prefix
pub const STAGING_DIR: &str = "staging";
pub const DAILY_DIR: &str = "daily";
pub const REPORTS_DIR: &str = "reports";
pub const EXTRACT_EXTENSION: &str = "parquet";

/// Value constraints
pub const MIN_VALID_VALUE: f64 = 0.0;

/// Processing defaults
pub const DEFAULT_CHUNK_SIZE: usize = 24;
pub const DEFAULT_MAP_CONCURRENCY: usize = 3;
pub const MAX_MAP_CONCURRENCY: usize = 64;
pub const DEFAULT_PARAMETER: &str = "pm25";
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;

/// Retry defaults
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5000;

/// Per-invocation timeouts (seconds)
pub const DEFAULT_PARTITION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_TRANSFORM_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_AGGREGATE_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_CLEAN_TIMEOUT_SECS: u64 = 300;

/// Environment variable prefix for settings
pub const ENV_PREFIX: &str = "AQ";

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
