//! Write-Ahead Logging (WAL) Module
//!
//! Every mutation accepted by the engine is first appended here, so the
//! in-memory tables of a generation can be rebuilt after a crash. One WAL
//! file belongs to exactly one *generation*: it lives at `<root>/<gen>.wal`
//! and is deleted only after the disk table `<root>/<gen>.sdb` that covers
//! the same commands has been synced and renamed into place.
//!
//! # On-disk layout
//!
//! ```text
//! [REC_LEN u32 LE][COMMAND BYTES]
//! [REC_LEN u32 LE][COMMAND BYTES]
//! ...
//! ```
//!
//! There is no header. A record whose length is zero terminates the log,
//! just like a clean end of file at a record boundary.
//!
//! # Replay
//!
//! [`replay`] walks any [`Read`] source and yields commands in file order.
//! Anything that is not a complete record (a partial length prefix, a short
//! body, an oversized length, an undecodable command) is reported as
//! [`WalError::CorruptLog`] and ends the iteration. A torn tail is never
//! silently dropped.
//!
//! # Durability
//!
//! Each record is written with a single `write_all`. When the log is opened
//! with `sync = true` every append is followed by [`File::sync_all`].

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    ffi::OsStr,
    fs::{self, File, OpenOptions},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::command::{self, Command, CommandError};
use crate::encoding::{FRAME_HEADER_SIZE, MAX_BYTE_LEN, check_len, len_to_u32};

/// File extension of write-ahead logs.
pub const WAL_EXTENSION: &str = "wal";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A command could not be encoded for appending.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// The log holds bytes that are not a complete, decodable record.
    #[error("corrupt log at offset {offset}: {reason}")]
    CorruptLog {
        /// Byte offset of the record that failed.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// Append-only command log of one generation.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
    generation: u64,
    sync: bool,
    len: u64,
    records: u64,
}

impl Wal {
    /// Opens or creates the log at `path` for appending.
    ///
    /// The file name must be `<generation>.wal`.
    pub fn open<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref();
        let generation = parse_generation(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("WAL file name must be <generation>.wal: {}", path.display()),
            )
        })?;

        let created = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if created {
            fsync_dir(path)?;
        }

        info!(path = %path.display(), generation, len, "opened WAL");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            generation,
            sync,
            len,
            records: 0,
        })
    }

    /// Appends one command as `[u32 len][command]`.
    ///
    /// A command whose encoding exceeds [`MAX_BYTE_LEN`] is rejected before
    /// anything is written.
    pub fn append(&mut self, cmd: &Command) -> Result<(), WalError> {
        let body = command::encode(cmd)?;
        let len = len_to_u32(body.len()).map_err(CommandError::from)?;
        check_len(len, "record").map_err(CommandError::from)?;

        let mut record = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&body);

        self.file.write_all(&record)?;
        if self.sync {
            self.file.sync_all()?;
        }

        self.len += record.len() as u64;
        self.records += 1;

        trace!(generation = self.generation, key = cmd.key(), len, "appended WAL record");
        Ok(())
    }

    /// Forces appended records to stable storage.
    pub fn sync(&self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replays the log from its first record through a fresh reader.
    pub fn replay_iter(&self) -> Result<WalIter<BufReader<File>>, WalError> {
        info!(path = %self.path.display(), "starting WAL replay");
        let file = File::open(&self.path)?;
        Ok(replay(BufReader::new(file)))
    }

    /// Deletes the backing file. A file that is already gone is not an error.
    pub fn remove(self) -> Result<(), WalError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %self.path.display(), generation = self.generation, "removed WAL");
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended through this handle.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// `true` if the file holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            error!(path = %self.path.display(), error = %e, "failed to sync WAL on drop");
        }
    }
}

/// Syncs the directory holding `path` so a newly created entry survives a
/// crash.
fn fsync_dir(path: &Path) -> Result<(), WalError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Path of the log for `generation` inside `root`.
pub fn wal_path(root: &Path, generation: u64) -> PathBuf {
    root.join(format!("{generation}.{WAL_EXTENSION}"))
}

/// Parses `<generation>.wal`.
pub fn parse_generation(path: &Path) -> Option<u64> {
    if path.extension().and_then(OsStr::to_str) != Some(WAL_EXTENSION) {
        return None;
    }
    path.file_stem()
        .and_then(OsStr::to_str)
        .and_then(|stem| stem.parse::<u64>().ok())
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Returns an iterator over the commands logged in `reader`.
pub fn replay<R: Read>(reader: R) -> WalIter<R> {
    WalIter {
        reader,
        offset: 0,
        done: false,
    }
}

/// Streaming replay iterator. Yields one command per record and stops after
/// the first error.
pub struct WalIter<R> {
    reader: R,
    offset: u64,
    done: bool,
}

impl<R: Read> WalIter<R> {
    fn corrupt(&mut self, reason: impl Into<String>) -> Option<Result<Command, WalError>> {
        self.done = true;
        let reason = reason.into();
        error!(offset = self.offset, reason = %reason, "corrupt WAL record");
        Some(Err(WalError::CorruptLog {
            offset: self.offset,
            reason,
        }))
    }

    /// Reads up to `buf.len()` bytes, returning how many arrived before EOF.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for WalIter<R> {
    type Item = Result<Command, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
        let got = match self.read_full(&mut len_bytes) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if got == 0 {
            trace!(offset = self.offset, "end of WAL reached");
            self.done = true;
            return None;
        }
        if got < FRAME_HEADER_SIZE {
            return self.corrupt(format!("partial length prefix ({got} bytes)"));
        }

        let len = u32::from_le_bytes(len_bytes);
        if len == 0 {
            trace!(offset = self.offset, "zero-length WAL terminator");
            self.done = true;
            return None;
        }
        if len > MAX_BYTE_LEN {
            return self.corrupt(format!("record length {len} exceeds {MAX_BYTE_LEN}"));
        }

        let mut body = vec![0u8; len as usize];
        let got = match self.read_full(&mut body) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if got < body.len() {
            return self.corrupt(format!("truncated record ({got} of {len} bytes)"));
        }

        match command::decode(&body) {
            Ok(cmd) => {
                self.offset += (FRAME_HEADER_SIZE + body.len()) as u64;
                Some(Ok(cmd))
            }
            Err(e) => self.corrupt(e.to_string()),
        }
    }
}
