//! Layered runtime settings: defaults, optional TOML file, `AQ_*` environment, CLI overrides.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{ProcessingError, Result};
use crate::models::OutputFormat;
use crate::utils::constants::*;
use crate::utils::RetryPolicy;
use crate::writers::parse_compression;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Settings {
    /// Location of the raw input, e.g. `s3://openaq-fetches/realtime-gzipped/`
    #[validate(length(min = 1))]
    pub source: String,

    /// Location that receives staging extracts, daily summaries and reports
    #[validate(length(min = 1))]
    pub target: String,

    #[validate(range(min = 1))]
    pub chunk_size: usize,

    #[validate(range(min = 1))]
    pub map_concurrency: usize,

    #[validate(length(min = 1))]
    pub parameter: String,

    /// Also delete anything left under the run's staging prefix
    pub sweep_staging: bool,

    pub log_level: String,

    #[validate(nested)]
    pub retry: RetrySettings,

    #[validate(nested)]
    pub timeouts: TimeoutSettings,

    pub output: OutputSettings,

    pub s3: S3Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TimeoutSettings {
    #[validate(range(min = 1))]
    pub partition_secs: u64,
    #[validate(range(min = 1))]
    pub transform_secs: u64,
    #[validate(range(min = 1))]
    pub aggregate_secs: u64,
    #[validate(range(min = 1))]
    pub clean_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub format: OutputFormat,
    /// Parquet codec; ignored for `csv_gzip`
    pub compression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    pub force_path_style: bool,
}

/// Values supplied on the command line; `None` leaves the loaded value alone
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub source: Option<String>,
    pub target: Option<String>,
    pub chunk_size: Option<usize>,
    pub map_concurrency: Option<usize>,
    pub parameter: Option<String>,
    pub format: Option<OutputFormat>,
    pub compression: Option<String>,
    pub no_sweep: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: "data/raw".to_string(),
            target: "data/output".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            map_concurrency: DEFAULT_MAP_CONCURRENCY,
            parameter: DEFAULT_PARAMETER.to_string(),
            sweep_staging: true,
            log_level: "info".to_string(),
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
            output: OutputSettings::default(),
            s3: S3Settings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            partition_secs: DEFAULT_PARTITION_TIMEOUT_SECS,
            transform_secs: DEFAULT_TRANSFORM_TIMEOUT_SECS,
            aggregate_secs: DEFAULT_AGGREGATE_TIMEOUT_SECS,
            clean_secs: DEFAULT_CLEAN_TIMEOUT_SECS,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Parquet,
            compression: COMPRESSION_SNAPPY.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and `AQ_*` environment variables
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Self::load_from(config_file, None)
    }

    /// Like [Settings::load], reading the environment from `env` instead of the process when given
    pub fn load_from(
        config_file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validated()
    }

    pub fn with_overrides(mut self, overrides: SettingsOverrides) -> Result<Self> {
        if let Some(source) = overrides.source {
            self.source = source;
        }
        if let Some(target) = overrides.target {
            self.target = target;
        }
        if let Some(chunk_size) = overrides.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(map_concurrency) = overrides.map_concurrency {
            self.map_concurrency = map_concurrency;
        }
        if let Some(parameter) = overrides.parameter {
            self.parameter = parameter;
        }
        if let Some(format) = overrides.format {
            self.output.format = format;
        }
        if let Some(compression) = overrides.compression {
            self.output.compression = compression;
        }
        if overrides.no_sweep {
            self.sweep_staging = false;
        }
        self.validated()
    }

    /// Run field validation and the checks derive attributes cannot express
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        parse_compression(&self.output.compression)?;
        if self.map_concurrency > MAX_MAP_CONCURRENCY {
            return Err(ProcessingError::Config(format!(
                "map_concurrency ({}) exceeds the maximum of {}",
                self.map_concurrency, MAX_MAP_CONCURRENCY
            )));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ProcessingError::Config(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
        )
    }
}

impl TimeoutSettings {
    pub fn partition(&self) -> Duration {
        Duration::from_secs(self.partition_secs)
    }

    pub fn transform(&self) -> Duration {
        Duration::from_secs(self.transform_secs)
    }

    pub fn aggregate(&self) -> Duration {
        Duration::from_secs(self.aggregate_secs)
    }

    pub fn clean(&self) -> Duration {
        Duration::from_secs(self.clean_secs)
    }
}
