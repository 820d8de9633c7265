use crate::command::Command;
use crate::memtable::{FrozenMemtable, Memtable};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Freezes `cmds` (in append order) into a table of generation 0.
pub fn frozen(cmds: &[Command]) -> FrozenMemtable {
    let mut table = Memtable::new(0);
    for cmd in cmds {
        table.append(cmd.clone());
    }
    table.freeze()
}

/// One frozen table of `count` sets with keys `key_<start..start+count>`.
pub fn frozen_range(start: usize, count: usize, tag: &str) -> FrozenMemtable {
    let cmds: Vec<Command> = (start..start + count)
        .map(|i| Command::set(format!("key_{i:04}"), format!("{tag}_{i:04}")))
        .collect();
    frozen(&cmds)
}
