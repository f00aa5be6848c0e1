pub mod aggregator;
pub mod cleaner;
pub mod partitioner;
pub mod transformer;

pub use aggregator::{Aggregator, DailyTable};
pub use cleaner::Cleaner;
pub use partitioner::{split_into_chunks, Partitioner};
pub use transformer::{deduplicate, Transformer};
