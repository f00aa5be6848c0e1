use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{FailureKind, Stage};
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Date parsing error: {0}")]
    DateParse(#[from] chrono::ParseError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("No input data for {date} under '{prefix}'")]
    NoInputData { date: NaiveDate, prefix: String },

    #[error("Chunk {chunk_index} failed: {source}")]
    ChunkProcessing {
        chunk_index: usize,
        #[source]
        source: Box<ProcessingError>,
    },

    #[error("Aggregation failed: {source}")]
    Aggregation {
        #[source]
        source: Box<ProcessingError>,
    },

    #[error("No extract recorded for chunk {chunk_index}")]
    MissingExtract { chunk_index: usize },

    #[error("Stage {stage} timed out after {seconds}s")]
    StageTimeout { stage: Stage, seconds: u64 },

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl ProcessingError {
    /// Wrap an error as the terminal failure of one chunk.
    pub fn chunk(chunk_index: usize, error: ProcessingError) -> Self {
        match error {
            already @ ProcessingError::ChunkProcessing { .. } => already,
            other => ProcessingError::ChunkProcessing {
                chunk_index,
                source: Box::new(other),
            },
        }
    }

    /// Wrap an error as the terminal failure of the aggregation stage.
    pub fn aggregation(error: ProcessingError) -> Self {
        match error {
            already @ ProcessingError::Aggregation { .. } => already,
            other => ProcessingError::Aggregation {
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessingError::NoInputData { .. } => FailureKind::NoInputData,
            ProcessingError::ChunkProcessing { .. } => FailureKind::ChunkProcessing,
            ProcessingError::Aggregation { .. } | ProcessingError::MissingExtract { .. } => {
                FailureKind::Aggregation
            }
            ProcessingError::StageTimeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Internal,
        }
    }

    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            ProcessingError::ChunkProcessing { chunk_index, .. } => Some(*chunk_index),
            _ => None,
        }
    }
}
