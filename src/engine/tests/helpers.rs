use std::fs;
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::engine::{Engine, EngineConfig};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times: only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Unsynced config with the given limits.
pub fn config(block_key_limit: u16, table_block_limit: u16) -> EngineConfig {
    init_tracing();
    EngineConfig {
        block_key_limit,
        table_block_limit,
        sync_writes: false,
    }
}

/// Limits large enough that no test here fills a table.
pub fn memtable_only_config() -> EngineConfig {
    config(1000, 10)
}

/// Two commands per table, two tables per generation.
pub fn tiny_config() -> EngineConfig {
    config(2, 2)
}

pub fn key(i: usize) -> String {
    format!("key_{i:04}")
}

pub fn value(i: usize) -> String {
    format!("val_{i:04}")
}

/// Writes `key(i) = value(i)` for every `i` in `range`.
pub fn fill(engine: &Engine, range: std::ops::Range<usize>) {
    for i in range {
        engine.set(key(i), value(i)).unwrap();
    }
}

/// Sorted file names in `dir` with the given extension.
pub fn files_with_ext(dir: &Path, ext: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some(ext))
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_owned))
        .collect();
    names.sort();
    names
}

pub fn wal_file(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{generation}.wal"))
}

pub fn sdb_file(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{generation}.sdb"))
}
