//! Startup recovery: rebuilds [`EngineInner`] from the files in the root
//! directory.
//!
//! 1. Leftover `*.tmp` files from interrupted flushes are deleted.
//! 2. Every `<id>.sdb` is opened and its sparse index loaded. A file that
//!    fails validation is deleted when `<id>.wal` still exists (the WAL is
//!    replayed instead). Otherwise the failure is returned.
//! 3. A WAL whose generation already has a valid disk table is redundant
//!    and is deleted.
//! 4. The remaining WALs are replayed in ascending generation order. A
//!    sealed WAL has its trailing partial table frozen, which restores the
//!    exact grouping it had before the crash.
//! 5. The highest WAL stays live if no disk table has a higher generation.
//!    Otherwise a fresh WAL is created above every generation on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::mem;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::command::Command;
use crate::memtable::{FrozenMemtable, Memtable};
use crate::sstable::{self, IndexedTable, builder::TMP_SUFFIX};
use crate::wal::{self, Wal, WalError};

use super::{EngineConfig, EngineError, EngineInner, discard};

/// Files found in the root directory, grouped by kind.
#[derive(Default)]
struct DirListing {
    disk: BTreeSet<u64>,
    wals: BTreeSet<u64>,
}

pub(super) fn recover(root: &Path, config: EngineConfig) -> Result<EngineInner, EngineError> {
    fs::create_dir_all(root)?;
    let listing = scan_dir(root)?;

    // Disk tables
    let mut disk = Vec::new();
    for &generation in &listing.disk {
        let path = sstable::sst_path(root, generation);
        match IndexedTable::load(&path) {
            Ok(table) => disk.push(Arc::new(table)),
            Err(e) if listing.wals.contains(&generation) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "disk table is invalid, replaying its WAL instead"
                );
                discard(&path, "invalid disk table")?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    disk.sort_by(|a, b| b.generation().cmp(&a.generation()));
    let loaded: BTreeSet<u64> = disk.iter().map(|t| t.generation()).collect();

    // Redundant WALs
    let mut wals = BTreeSet::new();
    for &generation in &listing.wals {
        if loaded.contains(&generation) {
            discard(&wal::wal_path(root, generation), "WAL already flushed")?;
        } else {
            wals.insert(generation);
        }
    }

    let max_disk = loaded.iter().next_back().copied();
    let live_gen = match (wals.iter().next_back().copied(), max_disk) {
        (Some(w), Some(d)) if w > d => w,
        (Some(w), None) => w,
        (w, d) => w.max(d).map_or(0, |g| g + 1),
    };

    let mut inner = EngineInner {
        root: root.to_path_buf(),
        config,
        active: Memtable::new(live_gen),
        immutable: Vec::new(),
        disk,
        wal: Wal::open(wal::wal_path(root, live_gen), config.sync_writes)?,
        sealed: BTreeMap::new(),
        closed: false,
    };

    // WAL replay, oldest generation first
    for generation in wals {
        if generation == live_gen {
            replay_live(&mut inner)?;
        } else {
            replay_sealed(&mut inner, generation)?;
        }
    }

    info!(
        root = %root.display(),
        live = live_gen,
        sealed = inner.sealed.len(),
        disk_tables = inner.disk.len(),
        "recovery complete"
    );
    Ok(inner)
}

fn scan_dir(root: &Path) -> Result<DirListing, EngineError> {
    let mut listing = DirListing::default();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TMP_SUFFIX));
        if is_tmp {
            discard(&path, "interrupted flush")?;
        } else if let Some(generation) = sstable::parse_generation(&path) {
            listing.disk.insert(generation);
        } else if let Some(generation) = wal::parse_generation(&path) {
            listing.wals.insert(generation);
        }
    }
    Ok(listing)
}

/// Appends replayed commands to `table`, moving every table that reaches
/// `limit` commands into `immutable`. Returns how many tables were frozen.
fn refill<I>(
    table: &mut Memtable,
    commands: I,
    limit: usize,
    immutable: &mut Vec<Arc<FrozenMemtable>>,
) -> Result<usize, EngineError>
where
    I: Iterator<Item = Result<Command, WalError>>,
{
    let generation = table.generation();
    let mut frozen = 0;
    for cmd in commands {
        table.append(cmd?);
        if table.len() >= limit {
            let full = mem::replace(table, Memtable::new(generation));
            immutable.push(Arc::new(full.freeze()));
            frozen += 1;
        }
    }
    Ok(frozen)
}

/// Replays a WAL that is not the live one into frozen tables of its
/// generation. An empty sealed WAL is deleted.
fn replay_sealed(inner: &mut EngineInner, generation: u64) -> Result<(), EngineError> {
    let log = Wal::open(wal::wal_path(&inner.root, generation), inner.config.sync_writes)?;
    let limit = usize::from(inner.config.block_key_limit);

    let mut table = Memtable::new(generation);
    let mut frozen = refill(&mut table, log.replay_iter()?, limit, &mut inner.immutable)?;
    if !table.is_empty() {
        inner.immutable.push(Arc::new(table.freeze()));
        frozen += 1;
    }

    if frozen == 0 {
        log.remove()?;
        warn!(generation, "removed empty sealed WAL");
        return Ok(());
    }

    info!(generation, tables = frozen, "recovered sealed WAL");
    inner.sealed.insert(generation, log);
    Ok(())
}

/// Replays the live WAL into the active table. The generation is sealed
/// afterwards if it already owns `table_block_limit` tables.
fn replay_live(inner: &mut EngineInner) -> Result<(), EngineError> {
    let live = inner.generation();
    let limit = usize::from(inner.config.block_key_limit);
    let records = inner.wal.replay_iter()?;
    let frozen = refill(&mut inner.active, records, limit, &mut inner.immutable)?;

    // A WAL written with a smaller block_key_limit can hold more tables than
    // one generation may own.
    if inner.owned_tables(live) >= usize::from(inner.config.table_block_limit) {
        if !inner.active.is_empty() {
            let partial = mem::replace(&mut inner.active, Memtable::new(live));
            inner.immutable.push(Arc::new(partial.freeze()));
        }
        inner.seal_live()?;
    }

    info!(
        generation = live,
        frozen,
        active = inner.active.len(),
        "recovered live WAL"
    );
    Ok(())
}
