//! # lsmdb
//!
//! An embeddable, persistent key-value store for string keys and values,
//! built as a small **Log-Structured Merge Tree**. Every write is logged to a
//! write-ahead log, buffered in memory tables, and flushed into compressed,
//! sparsely indexed disk tables.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lsmdb::{Db, DbConfig, DbError};
//!
//! let db = Db::open("/tmp/my_db", DbConfig::default()).unwrap();
//!
//! db.set("hello", "world").unwrap();
//! assert_eq!(db.query("hello").unwrap(), "world");
//!
//! db.delete("hello").unwrap();
//! assert!(matches!(db.query("hello"), Err(DbError::NotFound)));
//!
//! // Persist everything buffered in memory as disk tables.
//! db.flush().unwrap();
//!
//! db.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Write-ahead logging**: every mutation is logged before it is applied.
//! - **Generational flushes**: each WAL generation becomes exactly one disk
//!   table, and the WAL is removed only after that table is synced.
//! - **LZ4-compressed blocks** with a sparse `[min, max]` key index.
//! - **CRC32 footer**: damaged disk tables are detected on open.
//! - **Crash recovery**: WALs are replayed and leftover files cleaned up.
//! - **Optional background flush** on a dedicated worker thread.

pub mod command;
pub mod encoding;
pub mod engine;
pub mod memtable;
pub mod service;
pub mod sstable;
pub mod wal;

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use thiserror::Error;
use tracing::{debug, error, info};

pub use engine::{Engine, EngineConfig, EngineError, EngineStats};
pub use service::{LookupResponse, lookup};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance.
///
/// All fields have sensible defaults via [`DbConfig::default()`].
/// The configuration is validated when passed to [`Db::open`].
///
/// # Example
///
/// ```rust
/// use lsmdb::DbConfig;
///
/// let config = DbConfig {
///     block_key_limit: 128,
///     background_flush: false,
///     ..DbConfig::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbConfig {
    /// Commands per memory table before it is frozen. Also the number of
    /// commands in one disk block.
    ///
    /// Default: 1000. Must be ≥ 1.
    pub block_key_limit: u16,

    /// Frozen tables per WAL generation, and therefore blocks per disk
    /// table.
    ///
    /// Default: 10. Must be ≥ 1.
    pub table_block_limit: u16,

    /// `fsync` the WAL after every write.
    ///
    /// Default: `true`.
    pub sync_writes: bool,

    /// Flush sealed generations on a background thread once enough frozen
    /// tables are queued. When `false`, only [`Db::flush`] writes disk
    /// tables.
    ///
    /// Default: `true`.
    pub background_flush: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            block_key_limit: 1000,
            table_block_limit: 10,
            sync_writes: true,
            background_flush: true,
        }
    }
}

impl DbConfig {
    /// Validates all configuration parameters.
    fn validate(&self) -> Result<(), DbError> {
        if self.block_key_limit < 1 {
            return Err(DbError::InvalidConfig(
                "block_key_limit must be >= 1".into(),
            ));
        }
        if self.table_block_limit < 1 {
            return Err(DbError::InvalidConfig(
                "table_block_limit must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Converts to the internal engine configuration.
    fn to_engine_config(self) -> EngineConfig {
        EngineConfig {
            block_key_limit: self.block_key_limit,
            table_block_limit: self.table_block_limit,
            sync_writes: self.sync_writes,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Db`] operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database has been closed.
    #[error("database is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Key constraint violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The key was never written or has been deleted.
    #[error("key not exists")]
    NotFound,

    /// An engine-internal error occurred.
    #[error("{0}")]
    Engine(EngineError),
}

impl From<EngineError> for DbError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound => DbError::NotFound,
            EngineError::Closed => DbError::Closed,
            EngineError::InvalidConfig(msg) => DbError::InvalidConfig(msg),
            other => DbError::Engine(other),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Background worker state
// ------------------------------------------------------------------------------------------------

type Task = Box<dyn FnOnce() + Send>;

/// Sender and handle of the flush worker.
/// Taken (`Option::take`) on shutdown to ensure single cleanup.
struct BackgroundWorker {
    sender: crossbeam::channel::Sender<Task>,
    handle: thread::JoinHandle<()>,
}

// ------------------------------------------------------------------------------------------------
// Database handle
// ------------------------------------------------------------------------------------------------

/// The main database handle.
///
/// # Thread safety
///
/// `Db` is `Send + Sync` and can be shared across threads via `Arc<Db>`.
///
/// # Background flush
///
/// With [`DbConfig::background_flush`] enabled, a write that leaves at least
/// `table_block_limit` frozen tables queued hands a flush to the worker
/// thread. At most one such flush is pending at a time.
///
/// # Shutdown
///
/// Call [`Db::close`] for a graceful shutdown. If the handle is dropped
/// without calling `close`, the destructor performs the same cleanup but
/// ignores errors.
pub struct Db {
    engine: Engine,
    bg: Mutex<Option<BackgroundWorker>>,
    flush_pending: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) a database at the given directory, replaying any
    /// WALs left by a previous run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidConfig`] if any configuration parameter
    /// is out of range.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        config.validate()?;

        let engine = Engine::open(&path, config.to_engine_config())?;

        let bg = if config.background_flush {
            let (sender, receiver) = crossbeam::channel::unbounded::<Task>();
            let handle = thread::Builder::new()
                .name("lsmdb-flush".into())
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                })
                .map_err(EngineError::Io)?;
            Some(BackgroundWorker { sender, handle })
        } else {
            None
        };

        info!(
            path = %path.as_ref().display(),
            background_flush = config.background_flush,
            "database opened"
        );

        Ok(Self {
            engine,
            bg: Mutex::new(bg),
            flush_pending: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        })
    }

    /// Gracefully shuts down the database.
    ///
    /// Waits for a pending background flush, then syncs the WALs. Data that
    /// was not flushed stays in the WALs and is replayed by the next
    /// [`Db::open`].
    ///
    /// Subsequent operations on this handle return [`DbError::Closed`]. A
    /// write racing with `close` either lands before the final WAL sync or
    /// fails with [`DbError::Closed`]. Calling `close` more than once is
    /// harmless.
    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown_worker();
        self.engine.close()?;

        info!("database closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Write operations
    // --------------------------------------------------------------------------------------------

    /// Sets `key` to `value`.
    ///
    /// The write is persisted to the WAL before being applied in memory.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if `key` is empty.
    pub fn set(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.check_open()?;
        check_key(key)?;

        self.engine.set(key, value)?;
        self.maybe_schedule_flush()
    }

    /// Deletes `key` by writing a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if `key` is empty.
    pub fn delete(&self, key: &str) -> Result<(), DbError> {
        self.check_open()?;
        check_key(key)?;

        self.engine.delete(key)?;
        self.maybe_schedule_flush()
    }

    // --------------------------------------------------------------------------------------------
    // Read operations
    // --------------------------------------------------------------------------------------------

    /// Returns the newest value of `key`.
    ///
    /// # Errors
    ///
    /// - [`DbError::NotFound`] if the key was never written or is deleted.
    /// - [`DbError::InvalidArgument`] if `key` is empty.
    pub fn query(&self, key: &str) -> Result<String, DbError> {
        self.check_open()?;
        check_key(key)?;

        Ok(self.engine.query(key)?)
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, DbError> {
        self.check_open()?;
        Ok(self.engine.stats()?)
    }

    // --------------------------------------------------------------------------------------------
    // Flush and restore
    // --------------------------------------------------------------------------------------------

    /// Writes everything buffered in memory to disk tables and returns the
    /// number of tables written.
    pub fn flush(&self) -> Result<usize, DbError> {
        self.check_open()?;
        Ok(self.engine.flush()?)
    }

    /// Registers an existing disk table. See [`Engine::load_from_disk_file`].
    pub fn load_from_disk_file(&self, path: impl AsRef<Path>) -> Result<(), DbError> {
        self.check_open()?;
        Ok(self.engine.load_from_disk_file(path)?)
    }

    /// Replays a WAL stream without re-logging it. See
    /// [`Engine::load_from_wal`].
    pub fn load_from_wal<R: Read>(&self, reader: R) -> Result<usize, DbError> {
        self.check_open()?;
        let applied = self.engine.load_from_wal(reader)?;
        self.maybe_schedule_flush()?;
        Ok(applied)
    }

    // --------------------------------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------------------------------

    /// Returns `Err(DbError::Closed)` if the database has been closed.
    fn check_open(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        Ok(())
    }

    fn lock_bg(&self) -> Result<MutexGuard<'_, Option<BackgroundWorker>>, DbError> {
        self.bg
            .lock()
            .map_err(|_| EngineError::Internal("background worker mutex poisoned".into()).into())
    }

    /// Hands a flush to the worker if enough frozen tables are queued and no
    /// flush is already pending.
    fn maybe_schedule_flush(&self) -> Result<(), DbError> {
        let guard = self.lock_bg()?;
        let Some(bg) = guard.as_ref() else {
            return Ok(());
        };
        if !self.engine.needs_flush()? || self.flush_pending.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let engine = self.engine.clone();
        let pending = Arc::clone(&self.flush_pending);
        let task: Task = Box::new(move || {
            pending.store(false, Ordering::Release);
            match engine.flush() {
                Ok(written) => debug!(written, "background flush"),
                Err(e) => error!(error = %e, "background flush failed"),
            }
        });
        if bg.sender.send(task).is_err() {
            self.flush_pending.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Drains the task queue and joins the worker thread.
    fn shutdown_worker(&self) {
        let taken = match self.bg.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(bg) = taken {
            // Drop sender → the worker drains remaining tasks then exits.
            drop(bg.sender);
            if bg.handle.join().is_err() {
                error!("background flush worker panicked");
            }
        }
    }
}

fn check_key(key: &str) -> Result<(), DbError> {
    if key.is_empty() {
        return Err(DbError::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown_worker();
            if let Err(e) = self.engine.close() {
                error!(error = %e, "close on drop failed");
            }
        }
    }
}
