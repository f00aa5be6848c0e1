use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::OutputFormat;
use crate::utils::constants::{
    DAILY_DIR, EXTRACT_EXTENSION, GZIP_EXTENSION, RAW_EXTENSIONS, REPORTS_DIR, STAGING_DIR,
};

/// Object key layout for one pipeline deployment.
///
/// Raw input lives under `{source}{YYYY-MM-DD}/`; everything the pipeline writes lives under
/// the target prefix:
///
/// ```text
/// {target}staging/{date}/{run_id}/chunk-0000.parquet
/// {target}daily/{date}.parquet
/// {target}reports/{date}/{run_id}.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    source_prefix: String,
    target_prefix: String,
}

impl KeyLayout {
    pub fn new(source_prefix: &str, target_prefix: &str) -> Self {
        Self {
            source_prefix: normalize_prefix(source_prefix),
            target_prefix: normalize_prefix(target_prefix),
        }
    }

    pub fn raw_prefix(&self, date: NaiveDate) -> String {
        format!("{}{}/", self.source_prefix, date.format("%Y-%m-%d"))
    }

    pub fn staging_prefix(&self, date: NaiveDate, run_id: Uuid) -> String {
        format!(
            "{}{}/{}/{}/",
            self.target_prefix,
            STAGING_DIR,
            date.format("%Y-%m-%d"),
            run_id
        )
    }

    pub fn extract_key(&self, date: NaiveDate, run_id: Uuid, chunk_index: usize) -> String {
        format!(
            "{}chunk-{:04}.{}",
            self.staging_prefix(date, run_id),
            chunk_index,
            EXTRACT_EXTENSION
        )
    }

    pub fn output_key(&self, date: NaiveDate, format: OutputFormat) -> String {
        format!(
            "{}{}/{}.{}",
            self.target_prefix,
            DAILY_DIR,
            date.format("%Y-%m-%d"),
            format.extension()
        )
    }

    pub fn report_key(&self, date: NaiveDate, run_id: Uuid) -> String {
        format!(
            "{}{}/{}/{}.json",
            self.target_prefix,
            REPORTS_DIR,
            date.format("%Y-%m-%d"),
            run_id
        )
    }
}

/// Ensure a non-empty prefix ends with exactly one `/` and has no leading `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Whether a listed key looks like a raw input file (optionally gzipped)
pub fn is_raw_input_key(key: &str) -> bool {
    if key.ends_with('/') {
        return false;
    }
    let base = key.strip_suffix(GZIP_EXTENSION).unwrap_or(key);
    RAW_EXTENSIONS.iter().any(|ext| base.ends_with(ext))
}

pub fn is_gzip_key(key: &str) -> bool {
    key.ends_with(GZIP_EXTENSION)
}

/// Default target date: the UTC day before now
pub fn default_target_date() -> NaiveDate {
    (Utc::now() - Duration::days(1)).date_naive()
}
