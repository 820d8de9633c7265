//! Disk Table Module
//!
//! A disk table (`<generation>.sdb`) is the immutable, on-disk form of up to
//! `table_block_limit` frozen memory tables from one WAL generation.
//!
//! # On-disk layout
//!
//! ```text
//! [BLOCK_LEN u32][LZ4 FRAME]          block 0 (oldest table)
//! [BLOCK_LEN u32][LZ4 FRAME]          block 1
//! ...
//! [ENTRY_LEN u32][SPARSE INDEX ENTRY] one per non-empty block
//! ...
//! [FOOTER 40B]
//! ```
//!
//! - **Blocks** decompress to framed commands, sorted by key and unique
//!   within the block.
//! - **Sparse index** entries carry each block's `[min, max]` key range and
//!   the offset of its length prefix.
//! - **Footer** holds region offsets, the limits the file was written with,
//!   a magic value, a version and a CRC32.
//!
//! # Sub-modules
//!
//! - [`builder`]: [`SstWriter`] for writing disk tables.
//! - [`footer`]: [`Footer`] layout and validation.
//! - [`index`]: [`SparseIndexEntry`] layout and parsing.
//!
//! # Concurrency model
//!
//! Files are never modified after the rename that publishes them, so a
//! [`DiskTable`] is a read-only memory map that any number of threads may
//! query at once without locking.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod footer;
pub mod index;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports
// ------------------------------------------------------------------------------------------------

pub use builder::SstWriter;
pub use footer::{FOOTER_SIZE, Footer};
pub use index::SparseIndexEntry;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    ffi::OsStr,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use lz4_flex::frame::FrameDecoder;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{info, trace};

use crate::command::{self, Command, CommandError};
use crate::encoding::{self, EncodingError};

/// File extension of disk tables.
pub const SST_EXTENSION: &str = "sdb";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by disk table operations (read, write, build).
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error in the index or footer.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A command inside a block could not be encoded or decoded.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// A block's framing, bounds or compression is damaged.
    #[error("Corrupt block: {0}")]
    CorruptBlock(String),

    /// The footer failed its size, checksum, magic, version or bounds check.
    #[error("Corrupt footer: {0}")]
    CorruptFooter(String),

    /// The key is not in the requested block.
    #[error("Key not found")]
    NotFound,
}

/// Path of the disk table for `generation` inside `root`.
pub fn sst_path(root: &Path, generation: u64) -> PathBuf {
    root.join(format!("{generation}.{SST_EXTENSION}"))
}

/// Parses `<generation>.sdb`.
pub fn parse_generation(path: &Path) -> Option<u64> {
    if path.extension().and_then(OsStr::to_str) != Some(SST_EXTENSION) {
        return None;
    }
    path.file_stem()
        .and_then(OsStr::to_str)
        .and_then(|stem| stem.parse::<u64>().ok())
}

// ------------------------------------------------------------------------------------------------
// DiskTable: immutable reader
// ------------------------------------------------------------------------------------------------

/// Read-only, memory-mapped accessor over one `.sdb` file.
#[derive(Debug)]
pub struct DiskTable {
    mmap: Mmap,
    path: PathBuf,
    generation: u64,
    footer: Footer,
}

impl DiskTable {
    /// Opens and maps `path`, validating only the footer.
    ///
    /// # Errors
    ///
    /// - [`SSTableError::Io`] if the file cannot be opened or its name is not
    ///   `<generation>.sdb`.
    /// - [`SSTableError::CorruptFooter`] if the file is shorter than a footer
    ///   or the footer fails validation.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`. Disk tables are never written after
    /// they are renamed into place, the map is read-only, and every slice is
    /// bounds-checked against the footer before use.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let path = path.as_ref();
        let generation = parse_generation(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("disk table name must be <generation>.sdb: {}", path.display()),
            )
        })?;

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < FOOTER_SIZE as u64 {
            return Err(SSTableError::CorruptFooter(format!(
                "file is {file_len} bytes, smaller than the footer"
            )));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        let footer_start = mmap.len() - FOOTER_SIZE;
        let footer = Footer::decode(&mmap[footer_start..])?;
        footer.validate_bounds(mmap.len() as u64)?;

        info!(
            path = %path.display(),
            generation,
            data_length = footer.data_length,
            index_length = footer.index_length,
            "opened disk table"
        );

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            generation,
            footer,
        })
    }

    /// Parses the sparse index region the footer points at.
    pub fn sparse_index(&self) -> Result<Vec<SparseIndexEntry>, SSTableError> {
        let start = to_usize(self.footer.index_start)?;
        let len = to_usize(self.footer.index_length)?;
        index::parse_entries(&self.mmap[start..start + len])
    }

    /// Looks `key` up inside the block whose frame starts at `data_start`.
    ///
    /// Returns [`SSTableError::NotFound`] when the block does not hold the
    /// key. Tombstones are returned as commands.
    pub fn query(
        &self,
        block_index: u32,
        data_start: u64,
        key: &str,
    ) -> Result<Command, SSTableError> {
        let commands = self.read_block(block_index, data_start)?;
        trace!(
            generation = self.generation,
            block_index,
            commands = commands.len(),
            "searching block"
        );
        match commands.binary_search_by(|cmd| cmd.key().cmp(key)) {
            Ok(idx) => Ok(commands[idx].clone()),
            Err(_) => Err(SSTableError::NotFound),
        }
    }

    /// Decompresses and decodes every command of one block.
    pub fn read_block(&self, block_index: u32, data_start: u64) -> Result<Vec<Command>, SSTableError> {
        let corrupt = |what: &str| {
            SSTableError::CorruptBlock(format!(
                "block {block_index} at {data_start} in {}: {what}",
                self.path.display()
            ))
        };

        let data = &self.mmap[..to_usize(self.footer.data_length)?];
        let start = to_usize(data_start)?;
        if start >= data.len() {
            return Err(corrupt("offset outside the data region"));
        }
        let compressed = match encoding::read_frame(&data[start..]) {
            Ok(Some((payload, _))) => payload,
            Ok(None) => return Err(corrupt("empty frame")),
            Err(e) => return Err(corrupt(&e.to_string())),
        };

        let mut plain = Vec::new();
        FrameDecoder::new(compressed)
            .read_to_end(&mut plain)
            .map_err(|e| corrupt(&format!("decompression failed: {e}")))?;

        command::decode_framed_all(&plain).map_err(|e| corrupt(&e.to_string()))
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation parsed from the file name.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }
}

// ------------------------------------------------------------------------------------------------
// IndexedTable: a disk table bound to its sparse index
// ------------------------------------------------------------------------------------------------

/// A [`DiskTable`] together with its parsed sparse index, kept sorted by
/// block minimum key.
#[derive(Debug)]
pub struct IndexedTable {
    table: DiskTable,
    index: Vec<SparseIndexEntry>,
}

impl IndexedTable {
    /// Opens `path` and loads its sparse index.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let table = DiskTable::open(path)?;
        let mut index = table.sparse_index()?;
        index.sort_by(|a, b| a.key.cmp(&b.key).then(a.block_index.cmp(&b.block_index)));
        Ok(Self { table, index })
    }

    /// Finds the newest record for `key` in this file.
    ///
    /// Binary search bounds the candidates to blocks whose minimum is at most
    /// `key`. Those that also cover `key` are tried from the highest block
    /// index down, and the first hit wins.
    pub fn get(&self, key: &str) -> Result<Option<Command>, SSTableError> {
        let upper = self.index.partition_point(|entry| entry.key.as_str() <= key);
        let mut candidates: Vec<&SparseIndexEntry> = self.index[..upper]
            .iter()
            .filter(|entry| entry.covers(key))
            .collect();
        candidates.sort_by(|a, b| b.block_index.cmp(&a.block_index));

        for entry in candidates {
            match self.table.query(entry.block_index, entry.data_start, key) {
                Ok(cmd) => return Ok(Some(cmd)),
                Err(SSTableError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    pub fn index(&self) -> &[SparseIndexEntry] {
        &self.index
    }

    pub fn generation(&self) -> u64 {
        self.table.generation()
    }
}

fn to_usize(value: u64) -> Result<usize, SSTableError> {
    usize::try_from(value)
        .map_err(|_| SSTableError::CorruptBlock(format!("offset {value} exceeds addressable range")))
}
