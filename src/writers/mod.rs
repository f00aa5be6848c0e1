pub mod extract_writer;
pub mod summary_writer;

pub use extract_writer::{extract_schema, ExtractWriter};
pub use summary_writer::{
    parse_compression, read_summary, read_summary_file, SummaryFileInfo, SummaryWriter,
};
