use serde::{Deserialize, Serialize};

/// A balanced group of raw input file keys handled by one transformer invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub keys: Vec<String>,
}

impl Chunk {
    pub fn new(index: usize, keys: Vec<String>) -> Self {
        Self { index, keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Record counts reported by one transformer invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkCounts {
    /// Files fetched and decoded
    pub files: usize,
    /// Lines that parsed into a valid record
    pub parsed: usize,
    /// Lines skipped as malformed
    pub skipped: usize,
    /// Valid records of another parameter
    pub filtered: usize,
    /// Records replaced by a later observation with the same key
    pub duplicates: usize,
    /// Rows written to the extract
    pub written: usize,
}

impl ChunkCounts {
    pub fn merge(&mut self, other: &ChunkCounts) {
        self.files += other.files;
        self.parsed += other.parsed;
        self.skipped += other.skipped;
        self.filtered += other.filtered;
        self.duplicates += other.duplicates;
        self.written += other.written;
    }
}

/// Reference to the intermediate extract produced for one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkExtract {
    pub chunk_index: usize,
    pub key: String,
    pub counts: ChunkCounts,
}
