use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::command::Command;
use crate::wal::{Wal, WalError};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `count` alternating set/delete commands with predictable keys.
pub fn sample_commands(count: usize) -> Vec<Command> {
    (0..count)
        .map(|i| {
            if i % 3 == 2 {
                Command::delete(format!("key_{:04}", i - 1))
            } else {
                Command::set(format!("key_{i:04}"), format!("val_{i:04}"))
            }
        })
        .collect()
}

/// Replays the file at `path`, returning the good prefix and the first error.
pub fn replay_results(path: &Path) -> (Vec<Command>, Option<WalError>) {
    let wal = Wal::open(path, false).unwrap();
    let mut ok = Vec::new();
    let mut first_err = None;
    for item in wal.replay_iter().unwrap() {
        match item {
            Ok(cmd) => ok.push(cmd),
            Err(e) => {
                first_err = Some(e);
                break;
            }
        }
    }
    (ok, first_err)
}
