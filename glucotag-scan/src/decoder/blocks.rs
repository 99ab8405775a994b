//! Raw block sets read from the sensor tag

use serde::{Deserialize, Serialize};

/// Bytes per block on the sensor memory
pub const BLOCK_SIZE: usize = 8;

/// Ordered sequence of raw blocks, index = block number
///
/// Blocks may be shorter than `BLOCK_SIZE` or empty when a read returned
/// truncated data; the decoder treats those as missing rather than panicking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawBlockSet(Vec<Vec<u8>>);

impl RawBlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, block: Vec<u8>) {
        self.0.push(block);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Block at `index`, `None` past the end
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.0.get(index).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }

    /// Upper-case hex string per block, in block order
    pub fn hex_dump(&self) -> Vec<String> {
        self.0.iter().map(hex::encode_upper).collect()
    }

    /// Parse blocks from hex strings (case-insensitive, whitespace ignored)
    pub fn from_hex<S: AsRef<str>>(lines: &[S]) -> Result<Self, hex::FromHexError> {
        let mut set = Self::with_capacity(lines.len());
        for line in lines {
            let compact: String = line.as_ref().split_whitespace().collect();
            set.push(hex::decode(compact)?);
        }
        Ok(set)
    }
}

impl From<Vec<Vec<u8>>> for RawBlockSet {
    fn from(blocks: Vec<Vec<u8>>) -> Self {
        Self(blocks)
    }
}
