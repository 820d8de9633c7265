//! Disk table writer: turns frozen memory tables into one `.sdb` file.
//!
//! Each frozen table becomes exactly one block. Its framed, sorted body is
//! LZ4-compressed and written as `[u32 len][lz4 frame]`. Table `i` is block
//! `i`, so a higher block index always holds newer commands. Empty tables
//! produce no block and no index entry.
//!
//! # Atomicity
//!
//! 1. Write everything to `<path>.tmp`.
//! 2. Flush and sync the file.
//! 3. Rename `<path>.tmp` → `<path>`.
//! 4. Sync the parent directory so the rename itself is durable.
//!
//! A crash cannot leave a partially written `.sdb` behind, only a `.tmp`
//! that recovery deletes.

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use lz4_flex::frame::FrameEncoder;
use tracing::{debug, info};

use crate::encoding::{self, FRAME_HEADER_SIZE};
use crate::memtable::FrozenMemtable;

use super::{
    SSTableError,
    footer::Footer,
    index::{self, SparseIndexEntry},
};

/// Suffix appended to a disk table path while it is being built.
pub const TMP_SUFFIX: &str = ".tmp";

/// `<path>.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// LZ4 frame compression of one block body.
fn compress_block(body: &[u8]) -> Result<Vec<u8>, SSTableError> {
    let mut encoder = FrameEncoder::new(Vec::with_capacity(body.len() / 2));
    encoder.write_all(body)?;
    encoder
        .finish()
        .map_err(|e| SSTableError::Io(io::Error::other(e.to_string())))
}

fn fsync_dir(path: &Path) -> Result<(), SSTableError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Builds a complete disk table on disk.
///
/// ```rust,ignore
/// SstWriter::new(&path, block_key_limit, table_block_limit).build(&tables)?;
/// ```
pub struct SstWriter<P: AsRef<Path>> {
    path: P,
    block_key_limit: u16,
    table_block_limit: u16,
}

impl<P: AsRef<Path>> SstWriter<P> {
    /// Create a writer targeting the given output path. The limits are
    /// recorded in the footer.
    pub fn new(path: P, block_key_limit: u16, table_block_limit: u16) -> Self {
        Self {
            path,
            block_key_limit,
            table_block_limit,
        }
    }

    /// Writes `tables` (oldest first) as blocks, then the sparse index, then
    /// the footer, and atomically moves the file into place.
    pub fn build<'a, I>(self, tables: I) -> Result<Footer, SSTableError>
    where
        I: IntoIterator<Item = &'a FrozenMemtable>,
    {
        let final_path = self.path.as_ref();
        let tmp = tmp_path(final_path);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(&mut file);

        // 1. Data blocks
        let mut offset: u64 = 0;
        let mut entries = Vec::new();
        for (block_index, table) in tables.into_iter().enumerate() {
            let (Some(min), Some(max)) = (table.min_key(), table.max_key()) else {
                continue;
            };
            let block_index = u32::try_from(block_index)
                .map_err(|_| encoding::EncodingError::LengthOverflow("block index".into()))?;

            let (count, body) = table.bytes()?;
            let compressed = compress_block(&body)?;
            let len = encoding::len_to_u32(compressed.len())?;
            encoding::check_len(len, "block")?;

            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&compressed)?;

            debug!(
                block_index,
                count,
                raw = body.len(),
                compressed = compressed.len(),
                "wrote block"
            );

            entries.push(SparseIndexEntry {
                key: min.to_owned(),
                last_key: max.to_owned(),
                data_start: offset,
                block_index,
            });
            offset += (FRAME_HEADER_SIZE + compressed.len()) as u64;
        }
        let data_length = offset;

        // 2. Sparse index
        let mut index_bytes = Vec::new();
        for entry in &entries {
            index::write_entry(&mut index_bytes, entry)?;
        }
        writer.write_all(&index_bytes)?;

        // 3. Footer
        let footer = Footer {
            block_key_limit: self.block_key_limit,
            table_block_limit: self.table_block_limit,
            data_length,
            index_start: data_length,
            index_length: index_bytes.len() as u64,
        };
        writer.write_all(&encoding::encode_to_vec(&footer)?)?;

        // 4. Flush, sync, rename
        writer.flush()?;
        drop(writer);
        file.sync_all()?;
        fs::rename(&tmp, final_path)?;
        fsync_dir(final_path)?;

        info!(
            path = %final_path.display(),
            blocks = entries.len(),
            data_length,
            "wrote disk table"
        );
        Ok(footer)
    }
}
