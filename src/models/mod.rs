pub mod chunk;
pub mod record;
pub mod status;
pub mod summary;

pub use chunk::{Chunk, ChunkCounts, ChunkExtract};
pub use record::{is_valid_value, DedupKey, GroupKey, RawRecord};
pub use status::{
    AggregationStats, CleanupReport, CleanupWarning, FailureDescriptor, FailureKind, OutputRef,
    PipelineStatus, Stage,
};
pub use summary::{DailyAccumulator, DailySummaryRow, OutputFormat};
