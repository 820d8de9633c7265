//! # LSM Storage Engine
//!
//! A synchronous, crash-safe LSM key-value engine over string keys and
//! values.
//!
//! ## Design Overview
//!
//! Data lives in three layers, queried newest-first:
//!
//! 1. **Active memtable**: append-ordered commands of the live WAL
//!    generation.
//! 2. **Immutable memtables**: frozen tables awaiting flush. A table is
//!    frozen as soon as it holds [`EngineConfig::block_key_limit`] commands.
//! 3. **Disk tables**: `<generation>.sdb` files, one per flushed WAL
//!    generation, each holding up to [`EngineConfig::table_block_limit`]
//!    compressed blocks.
//!
//! ## Generations
//!
//! Every command is logged in the live `<generation>.wal` before it reaches
//! the active table, and every frozen table remembers that generation. Once
//! the live generation owns `table_block_limit` frozen tables (or a flush
//! starts) its WAL is *sealed* and a new generation begins. A sealed
//! generation is flushed into exactly one disk table, so a WAL is deleted
//! only when every command it holds is in a synced `.sdb` file.
//!
//! ## Concurrency Model
//!
//! All engine state is protected by a single `Arc<RwLock<EngineInner>>`.
//! Writes take the write lock. Queries take the read lock only for the
//! in-memory layers, then search a snapshot of `Arc` disk-table handles
//! without holding it. Flushes are serialized by their own mutex and hold
//! the write lock only to seal and to register each finished file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::command::Command;
use crate::encoding::EncodingError;
use crate::memtable::{FrozenMemtable, Memtable};
use crate::sstable::{self, IndexedTable, SSTableError, SstWriter};
use crate::wal::{self, Wal, WalError};

mod recovery;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error originating from the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from a disk table.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The key was never written or its newest record is a delete.
    #[error("key not exists")]
    NotFound,

    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A loaded disk table would share its generation with data the engine
    /// already holds.
    #[error("disk table generation {file} collides with generation {in_use} already in use")]
    GenerationConflict {
        /// Generation of the file being loaded.
        file: u64,
        /// Generation it collides with.
        in_use: u64,
    },

    /// The engine was closed and accepts no more writes.
    #[error("engine is closed")]
    Closed,

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance. Passed to [`Engine::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Commands per memory table (and per disk block) before it is frozen.
    pub block_key_limit: u16,

    /// Frozen tables per WAL generation (and blocks per disk table).
    pub table_block_limit: u16,

    /// `fsync` the WAL after every append.
    pub sync_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_key_limit: 1000,
            table_block_limit: 10,
            sync_writes: true,
        }
    }
}

impl EngineConfig {
    /// Both limits must be at least 1.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.block_key_limit < 1 {
            return Err(EngineError::InvalidConfig(
                "block_key_limit must be >= 1".into(),
            ));
        }
        if self.table_block_limit < 1 {
            return Err(EngineError::InvalidConfig(
                "table_block_limit must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Commands in the active memtable.
    pub active_len: usize,
    /// Frozen memtables pending flush.
    pub immutable_count: usize,
    /// Sealed WAL generations pending flush.
    pub sealed_wals: usize,
    /// Loaded disk tables.
    pub disk_tables: usize,
    /// Sparse index entries across all disk tables.
    pub index_entries: usize,
    /// Live WAL generation.
    pub generation: u64,
}

// ------------------------------------------------------------------------------------------------
// Engine state
// ------------------------------------------------------------------------------------------------

struct EngineInner {
    /// Directory holding every `.wal` and `.sdb` file.
    root: PathBuf,

    config: EngineConfig,

    /// Table receiving writes. Always of the live WAL's generation.
    active: Memtable,

    /// Frozen tables, oldest first.
    immutable: Vec<Arc<FrozenMemtable>>,

    /// Disk tables, highest generation first.
    disk: Vec<Arc<IndexedTable>>,

    /// Log of the live generation.
    wal: Wal,

    /// Logs closed to new writes and waiting for their flush.
    sealed: BTreeMap<u64, Wal>,

    /// Set by [`Engine::close`]. Checked under the write lock, so no append
    /// can follow the final sync.
    closed: bool,
}

impl EngineInner {
    fn generation(&self) -> u64 {
        self.wal.generation()
    }

    fn owned_tables(&self, generation: u64) -> usize {
        self.immutable
            .iter()
            .filter(|t| t.generation() == generation)
            .count()
    }

    fn insert_disk_table(&mut self, table: Arc<IndexedTable>) {
        let pos = self
            .disk
            .partition_point(|t| t.generation() > table.generation());
        self.disk.insert(pos, table);
    }

    /// Appends `cmd` (to the WAL too unless restoring) and freezes the
    /// active table once it is full. Returns `true` if a freeze happened.
    fn apply(&mut self, cmd: Command, restore: bool) -> Result<bool, EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        if !restore {
            self.wal.append(&cmd)?;
        }
        self.active.append(cmd);
        if self.active.len() >= usize::from(self.config.block_key_limit) {
            self.freeze_active()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Moves the active table into the immutable queue and seals the live
    /// generation if it now owns `table_block_limit` tables.
    fn freeze_active(&mut self) -> Result<(), EngineError> {
        let generation = self.generation();
        let active = mem::replace(&mut self.active, Memtable::new(generation));
        self.immutable.push(Arc::new(active.freeze()));

        if self.owned_tables(generation) >= usize::from(self.config.table_block_limit) {
            self.seal_live()?;
        }
        Ok(())
    }

    /// Closes the live WAL to new writes and starts the next generation.
    ///
    /// The active table must be empty.
    fn seal_live(&mut self) -> Result<(), EngineError> {
        if !self.active.is_empty() {
            return Err(EngineError::Internal(
                "cannot seal a generation with a non-empty active table".into(),
            ));
        }
        let next = self.generation() + 1;
        let new_wal = Wal::open(wal::wal_path(&self.root, next), self.config.sync_writes)?;
        let sealed = mem::replace(&mut self.wal, new_wal);
        sealed.sync()?;
        self.active = Memtable::new(next);

        debug!(
            sealed = sealed.generation(),
            tables = self.owned_tables(sealed.generation()),
            next,
            "sealed WAL generation"
        );
        self.sealed.insert(sealed.generation(), sealed);
        Ok(())
    }

    /// Frozen tables of the oldest sealed generation, if any.
    fn next_flush_job(&self) -> Option<FlushJob> {
        let (&generation, _) = self.sealed.iter().next()?;
        let tables = self
            .immutable
            .iter()
            .filter(|t| t.generation() == generation)
            .cloned()
            .collect();
        Some(FlushJob {
            generation,
            tables,
            path: sstable::sst_path(&self.root, generation),
            config: self.config,
        })
    }
}

/// Everything a flush needs to write one generation outside the lock.
struct FlushJob {
    generation: u64,
    tables: Vec<Arc<FrozenMemtable>>,
    path: PathBuf,
    config: EngineConfig,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The main LSM storage engine handle.
///
/// Thread-safe: can be cloned and shared across threads.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
    flush_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    // --------------------------------------------------------------------------------------------
    // Lock helpers
    // --------------------------------------------------------------------------------------------

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, EngineInner>, EngineError> {
        self.inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, EngineInner>, EngineError> {
        self.inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) an engine rooted at `root`, recovering any state
    /// left by a previous run.
    pub fn open(root: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let inner = recovery::recover(root.as_ref(), config)?;

        info!(
            root = %inner.root.display(),
            generation = inner.generation(),
            active = inner.active.len(),
            immutable = inner.immutable.len(),
            disk_tables = inner.disk.len(),
            "engine opened"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            flush_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Syncs the WALs and the root directory. Unflushed data stays in the
    /// WALs and is replayed by the next [`Engine::open`].
    ///
    /// Later writes fail with [`EngineError::Closed`]. Reads and flushes
    /// still work.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        inner.closed = true;
        inner.wal.sync()?;
        for sealed in inner.sealed.values() {
            sealed.sync()?;
        }
        if let Ok(dir) = fs::File::open(&inner.root) {
            dir.sync_all()?;
        }
        info!(root = %inner.root.display(), "engine closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Sets `key` to `value`.
    ///
    /// Returns `Ok(true)` if the active memtable was frozen.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<bool, EngineError> {
        let cmd = Command::set(key, value);
        trace!(key = cmd.key(), value_len = cmd.value().len(), "engine set");
        self.write_lock()?.apply(cmd, false)
    }

    /// Deletes `key` by writing a tombstone.
    ///
    /// Returns `Ok(true)` if the active memtable was frozen.
    pub fn delete(&self, key: impl Into<String>) -> Result<bool, EngineError> {
        let cmd = Command::delete(key);
        trace!(key = cmd.key(), "engine delete");
        self.write_lock()?.apply(cmd, false)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Returns the newest value of `key`.
    ///
    /// The lookup order is: active memtable → immutable memtables →
    /// disk tables (all newest-first). The first record found wins, and a
    /// tombstone yields [`EngineError::NotFound`].
    pub fn query(&self, key: &str) -> Result<String, EngineError> {
        trace!(key, "engine query");

        let disk = {
            let inner = self.read_lock()?;

            if let Some(cmd) = inner.active.query(key) {
                return resolve(cmd.clone());
            }
            for table in inner.immutable.iter().rev() {
                if let Some(cmd) = table.query(key) {
                    return resolve(cmd.clone());
                }
            }
            inner.disk.clone()
        };

        for table in &disk {
            if let Some(cmd) = table.get(key)? {
                return resolve(cmd);
            }
        }
        Err(EngineError::NotFound)
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.read_lock()?;
        Ok(EngineStats {
            active_len: inner.active.len(),
            immutable_count: inner.immutable.len(),
            sealed_wals: inner.sealed.len(),
            disk_tables: inner.disk.len(),
            index_entries: inner.disk.iter().map(|t| t.index().len()).sum(),
            generation: inner.generation(),
        })
    }

    /// `true` once the immutable queue holds at least `table_block_limit`
    /// tables.
    pub fn needs_flush(&self) -> Result<bool, EngineError> {
        let inner = self.read_lock()?;
        Ok(inner.immutable.len() >= usize::from(inner.config.table_block_limit))
    }

    // --------------------------------------------------------------------------------------------
    // Flush
    // --------------------------------------------------------------------------------------------

    /// Writes every unflushed generation to its own disk table.
    ///
    /// The active table is frozen first (if non-empty) and the live WAL is
    /// sealed, then sealed generations are flushed oldest first. Writes may
    /// continue while files are being built.
    ///
    /// Returns the number of disk tables written.
    pub fn flush(&self) -> Result<usize, EngineError> {
        let _flush = self
            .flush_lock
            .lock()
            .map_err(|_| EngineError::Internal("flush mutex poisoned".into()))?;

        {
            let mut inner = self.write_lock()?;
            if !inner.active.is_empty() {
                inner.freeze_active()?;
            }
            let live = inner.generation();
            if inner.owned_tables(live) > 0 {
                inner.seal_live()?;
            }
        }

        let mut written = 0;
        loop {
            let Some(job) = self.read_lock()?.next_flush_job() else {
                break;
            };
            self.flush_generation(job)?;
            written += 1;
        }

        if written > 0 {
            info!(written, "flush complete");
        }
        Ok(written)
    }

    fn flush_generation(&self, job: FlushJob) -> Result<(), EngineError> {
        let FlushJob {
            generation,
            tables,
            path,
            config,
        } = job;

        SstWriter::new(&path, config.block_key_limit, config.table_block_limit)
            .build(tables.iter().map(Arc::as_ref))?;
        let table = Arc::new(IndexedTable::load(&path)?);

        let sealed = {
            let mut inner = self.write_lock()?;
            inner.insert_disk_table(table);
            inner.immutable.retain(|t| t.generation() != generation);
            inner.sealed.remove(&generation)
        };
        if let Some(wal) = sealed {
            wal.remove()?;
        }

        debug!(generation, tables = tables.len(), path = %path.display(), "flushed generation");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Restore
    // --------------------------------------------------------------------------------------------

    /// Registers an existing disk table and its sparse index.
    ///
    /// The live generation is moved past the file's generation when its WAL
    /// is still empty. A file whose generation is already used by unflushed
    /// data is rejected with [`EngineError::GenerationConflict`].
    pub fn load_from_disk_file(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let table = Arc::new(IndexedTable::load(path.as_ref())?);
        let file_gen = table.generation();

        let mut inner = self.write_lock()?;
        let live = inner.generation();

        let taken = inner.disk.iter().any(|t| t.generation() == file_gen)
            || inner.sealed.contains_key(&file_gen)
            || inner.owned_tables(file_gen) > 0;
        if taken {
            return Err(EngineError::GenerationConflict {
                file: file_gen,
                in_use: file_gen,
            });
        }

        if file_gen >= live {
            let untouched =
                inner.wal.is_empty() && inner.active.is_empty() && inner.owned_tables(live) == 0;
            if !untouched {
                return Err(EngineError::GenerationConflict {
                    file: file_gen,
                    in_use: live,
                });
            }
            let next = file_gen + 1;
            let new_wal = Wal::open(wal::wal_path(&inner.root, next), inner.config.sync_writes)?;
            let old = mem::replace(&mut inner.wal, new_wal);
            old.remove()?;
            inner.active = Memtable::new(next);
            debug!(from = live, to = next, "moved live generation past loaded disk table");
        }

        info!(
            path = %path.as_ref().display(),
            generation = file_gen,
            blocks = table.index().len(),
            "loaded disk table"
        );
        inner.insert_disk_table(table);
        Ok(())
    }

    /// Replays a WAL stream into the live generation without re-logging.
    ///
    /// Returns the number of commands applied.
    pub fn load_from_wal<R: Read>(&self, reader: R) -> Result<usize, EngineError> {
        let mut inner = self.write_lock()?;
        let mut applied = 0;
        for cmd in wal::replay(reader) {
            inner.apply(cmd?, true)?;
            applied += 1;
        }
        debug!(applied, "replayed WAL stream");
        Ok(applied)
    }
}

/// Turns the newest record for a key into a query result.
fn resolve(cmd: Command) -> Result<String, EngineError> {
    cmd.into_value().ok_or(EngineError::NotFound)
}

/// Logs and removes a file that recovery decided to discard.
fn discard(path: &Path, reason: &str) -> Result<(), EngineError> {
    warn!(path = %path.display(), reason, "discarding file");
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
