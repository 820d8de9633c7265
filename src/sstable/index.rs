//! Sparse index: one entry per non-empty block.
//!
//! Each entry records the key range a block covers and where its frame
//! starts, so a lookup decompresses at most the blocks whose range contains
//! the key. On disk the entries follow the data region as
//! `[u32 len][entry]` frames, ended by the region boundary or a zero-length
//! frame.

use crate::encoding::{self, Decode, Encode, EncodingError};

use super::SSTableError;

/// Location and key range of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseIndexEntry {
    /// Smallest key in the block.
    pub key: String,
    /// Largest key in the block.
    pub last_key: String,
    /// Offset of the block's length prefix.
    pub data_start: u64,
    /// Position of the block in the file, starting at 0 for the oldest.
    pub block_index: u32,
}

impl SparseIndexEntry {
    /// `true` if `key` lies in `[self.key, self.last_key]`.
    pub fn covers(&self, key: &str) -> bool {
        self.key.as_str() <= key && key <= self.last_key.as_str()
    }
}

impl Encode for SparseIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.last_key.encode_to(buf)?;
        self.data_start.encode_to(buf)?;
        self.block_index.encode_to(buf)
    }
}

impl Decode for SparseIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (last_key, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (data_start, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (block_index, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key,
                last_key,
                data_start,
                block_index,
            },
            off,
        ))
    }
}

/// Appends `entry` to `buf` as one frame.
pub fn write_entry(buf: &mut Vec<u8>, entry: &SparseIndexEntry) -> Result<(), EncodingError> {
    let body = encoding::encode_to_vec(entry)?;
    encoding::write_frame(buf, &body)
}

/// Parses every entry in an index region.
pub fn parse_entries(region: &[u8]) -> Result<Vec<SparseIndexEntry>, SSTableError> {
    let mut entries = Vec::new();
    for frame in encoding::frames(region) {
        let frame = frame?;
        let (entry, consumed) = encoding::decode_from_slice::<SparseIndexEntry>(frame)?;
        if consumed != frame.len() {
            return Err(EncodingError::Custom(format!(
                "index entry has {} trailing bytes",
                frame.len() - consumed
            ))
            .into());
        }
        entries.push(entry);
    }
    Ok(entries)
}
