pub mod extract_reader;
pub mod raw_reader;

pub use extract_reader::ExtractReader;
pub use raw_reader::{parse_timestamp, ParsedFile, RawReader};
