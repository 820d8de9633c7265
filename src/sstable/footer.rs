//! Fixed-width trailer of a `.sdb` file.
//!
//! ```text
//! [MAGIC "SDB1" 4B][VERSION u32][BLOCK_KEY_LIMIT u16][TABLE_BLOCK_LIMIT u16]
//! [DATA_LENGTH u64][INDEX_START u64][INDEX_LENGTH u64][CRC32 u32]
//! ```
//!
//! The CRC covers the 36 bytes in front of it. A reader locates the footer at
//! `file_len - FOOTER_SIZE` and never has to scan the file.

use crc32fast::Hasher as Crc32;

use crate::encoding::{self, Decode, Encode, EncodingError};

use super::SSTableError;

/// Width of the encoded footer in bytes.
pub const FOOTER_SIZE: usize = 40;

/// Identifies lsmdb disk tables.
pub const FOOTER_MAGIC: [u8; 4] = *b"SDB1";

/// Bumped whenever any field width of the file layout changes.
pub const FOOTER_VERSION: u32 = 1;

const CRC_SIZE: usize = std::mem::size_of::<u32>();

/// Decoded footer of a disk table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Commands per block the table was written with.
    pub block_key_limit: u16,
    /// Maximum blocks per file the table was written with.
    pub table_block_limit: u16,
    /// Length of the data region, which starts at offset 0.
    pub data_length: u64,
    /// Offset of the first sparse-index entry.
    pub index_start: u64,
    /// Length of the sparse-index region.
    pub index_length: u64,
}

impl Footer {
    /// Decodes and validates a footer.
    ///
    /// `bytes` must be exactly [`FOOTER_SIZE`] long. The checksum is checked
    /// before the magic and version.
    pub fn decode(bytes: &[u8]) -> Result<Self, SSTableError> {
        if bytes.len() != FOOTER_SIZE {
            return Err(SSTableError::CorruptFooter(format!(
                "footer is {} bytes, expected {FOOTER_SIZE}",
                bytes.len()
            )));
        }

        let body = &bytes[..FOOTER_SIZE - CRC_SIZE];
        let (stored, _) = u32::decode_from(&bytes[FOOTER_SIZE - CRC_SIZE..])?;
        let computed = checksum(body);
        if stored != computed {
            return Err(SSTableError::CorruptFooter(format!(
                "checksum mismatch (stored {stored:08x}, computed {computed:08x})"
            )));
        }

        let (raw, _) = encoding::decode_from_slice::<RawFooter>(body)?;
        if raw.magic != FOOTER_MAGIC {
            return Err(SSTableError::CorruptFooter("bad magic".into()));
        }
        if raw.version != FOOTER_VERSION {
            return Err(SSTableError::CorruptFooter(format!(
                "unsupported version {}",
                raw.version
            )));
        }
        Ok(raw.footer)
    }

    /// Checks that the regions the footer points at lie inside a file of
    /// `file_len` bytes and do not overlap.
    pub fn validate_bounds(&self, file_len: u64) -> Result<(), SSTableError> {
        let body_len = file_len.saturating_sub(FOOTER_SIZE as u64);
        let index_end = self.index_start.checked_add(self.index_length);
        match index_end {
            Some(end) if self.data_length <= self.index_start && end <= body_len => Ok(()),
            _ => Err(SSTableError::CorruptFooter(format!(
                "regions out of bounds (data_length={}, index_start={}, index_length={}, file_len={file_len})",
                self.data_length, self.index_start, self.index_length
            ))),
        }
    }
}

impl Encode for Footer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let start = buf.len();
        FOOTER_MAGIC.encode_to(buf)?;
        FOOTER_VERSION.encode_to(buf)?;
        self.block_key_limit.encode_to(buf)?;
        self.table_block_limit.encode_to(buf)?;
        self.data_length.encode_to(buf)?;
        self.index_start.encode_to(buf)?;
        self.index_length.encode_to(buf)?;
        let crc = checksum(&buf[start..]);
        crc.encode_to(buf)
    }
}

/// Footer fields as stored, before magic and version are checked.
struct RawFooter {
    magic: [u8; 4],
    version: u32,
    footer: Footer,
}

impl Decode for RawFooter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (block_key_limit, n) = u16::decode_from(&buf[off..])?;
        off += n;
        let (table_block_limit, n) = u16::decode_from(&buf[off..])?;
        off += n;
        let (data_length, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (index_start, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (index_length, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                footer: Footer {
                    block_key_limit,
                    table_block_limit,
                    data_length,
                    index_start,
                    index_length,
                },
            },
            off,
        ))
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}
