//! # Memtable Module
//!
//! In-memory buffering of commands before they reach disk.
//!
//! A table has two states and the type system keeps them apart:
//!
//! - [`Memtable`] is the *active* table. Commands are appended in arrival
//!   order, duplicates and all, and point lookups scan backwards so the most
//!   recent record for a key wins.
//! - [`FrozenMemtable`] is produced by [`Memtable::freeze`], which consumes
//!   the active table. It is sorted by key and keeps only the last record
//!   per key, so lookups are a binary search and the body can be written to
//!   disk as one sorted block.
//!
//! Both remember the WAL generation their commands were logged in.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use tracing::debug;

use crate::command::{self, Command, CommandError};

// ------------------------------------------------------------------------------------------------
// Active table
// ------------------------------------------------------------------------------------------------

/// The mutable, append-ordered table that receives new writes.
#[derive(Debug, Default)]
pub struct Memtable {
    commands: Vec<Command>,
    generation: u64,
}

impl Memtable {
    /// Creates an empty table whose commands are logged in `generation`.
    pub fn new(generation: u64) -> Self {
        Self {
            commands: Vec::new(),
            generation,
        }
    }

    /// Appends `cmd`. No uniqueness check is made.
    pub fn append(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    /// Returns the most recent command for `key`, tombstones included.
    pub fn query(&self, key: &str) -> Option<&Command> {
        self.commands.iter().rev().find(|cmd| cmd.key() == key)
    }

    /// Sorts by key and keeps only the last record per key.
    pub fn freeze(self) -> FrozenMemtable {
        let appended = self.commands.len();
        let mut latest: BTreeMap<String, Command> = BTreeMap::new();
        for cmd in self.commands {
            latest.insert(cmd.key().to_owned(), cmd);
        }
        let commands: Vec<Command> = latest.into_values().collect();

        debug!(
            generation = self.generation,
            appended,
            unique = commands.len(),
            "froze memtable"
        );

        FrozenMemtable {
            commands,
            generation: self.generation,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `(count, body)` where the body is every command framed, in
    /// insertion order.
    pub fn bytes(&self) -> Result<(usize, Vec<u8>), CommandError> {
        framed_body(&self.commands)
    }
}

// ------------------------------------------------------------------------------------------------
// Frozen table
// ------------------------------------------------------------------------------------------------

/// A sorted, de-duplicated table awaiting flush.
#[derive(Debug)]
pub struct FrozenMemtable {
    commands: Vec<Command>,
    generation: u64,
}

impl FrozenMemtable {
    /// Binary search for `key`. Tombstones are returned as-is.
    pub fn query(&self, key: &str) -> Option<&Command> {
        self.commands
            .binary_search_by(|cmd| cmd.key().cmp(key))
            .ok()
            .map(|idx| &self.commands[idx])
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Smallest key, which becomes the block key in the sparse index.
    pub fn min_key(&self) -> Option<&str> {
        self.commands.first().map(Command::key)
    }

    pub fn max_key(&self) -> Option<&str> {
        self.commands.last().map(Command::key)
    }

    /// WAL generation the commands were logged in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Returns `(count, body)`: the sorted commands, framed.
    pub fn bytes(&self) -> Result<(usize, Vec<u8>), CommandError> {
        framed_body(&self.commands)
    }
}

fn framed_body(commands: &[Command]) -> Result<(usize, Vec<u8>), CommandError> {
    let mut body = Vec::new();
    for cmd in commands {
        command::encode_framed(cmd, &mut body)?;
    }
    Ok((commands.len(), body))
}
