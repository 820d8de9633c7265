//! # Command Module
//!
//! A [`Command`] is one mutation: a `Set` of a key to a value, or a `Delete`
//! of a key (a tombstone). Commands are the unit of every persisted
//! structure in lsmdb. The WAL stores one per record, memory tables hold them
//! in append order, and disk blocks store them sorted by key.
//!
//! # On-disk layout
//!
//! ```text
//! Set:    [KIND u8 = 1][KEY_LEN u32][KEY][VALUE_LEN u32][VALUE]
//! Delete: [KIND u8 = 2][KEY_LEN u32][KEY]
//! ```
//!
//! Every length is explicit, so keys and values may contain any bytes
//! (including the ones a delimiter-based format would reserve).
//!
//! When commands are concatenated (memory-table bodies, disk blocks) each one
//! is wrapped in a `[u32 len][command]` frame, see [`encode_framed`].


use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned while encoding or decoding commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The bytes do not describe a well-formed command.
    #[error("corrupt record: {0}")]
    CorruptRecord(#[from] EncodingError),
}

// ------------------------------------------------------------------------------------------------
// Command
// ------------------------------------------------------------------------------------------------

/// Kind of mutation carried by a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Associate a value with the key.
    Set,
    /// Remove the key. Shadows any older value.
    Delete,
}

impl CommandKind {
    const SET_TAG: u8 = 1;
    const DELETE_TAG: u8 = 2;

    fn tag(self) -> u8 {
        match self {
            CommandKind::Set => Self::SET_TAG,
            CommandKind::Delete => Self::DELETE_TAG,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, EncodingError> {
        match tag {
            Self::SET_TAG => Ok(CommandKind::Set),
            Self::DELETE_TAG => Ok(CommandKind::Delete),
            other => Err(EncodingError::InvalidTag {
                tag: u32::from(other),
                type_name: "CommandKind",
            }),
        }
    }
}

/// A single set or delete record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    key: String,
    value: String,
    kind: CommandKind,
}

impl Command {
    /// Builds a `Set` command.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: CommandKind::Set,
        }
    }

    /// Builds a `Delete` command (tombstone).
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            kind: CommandKind::Delete,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The stored value. Always empty for a `Delete`.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn is_delete(&self) -> bool {
        self.kind == CommandKind::Delete
    }

    /// Consumes the command and returns its value when it is a `Set`.
    pub fn into_value(self) -> Option<String> {
        match self.kind {
            CommandKind::Set => Some(self.value),
            CommandKind::Delete => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Encoding
// ------------------------------------------------------------------------------------------------

impl Encode for Command {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.kind.tag().encode_to(buf)?;
        self.key.encode_to(buf)?;
        if self.kind == CommandKind::Set {
            self.value.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for Command {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (tag, n) = u8::decode_from(buf)?;
        off += n;
        let kind = CommandKind::from_tag(tag)?;
        let (key, n) = String::decode_from(&buf[off..])?;
        off += n;
        let value = match kind {
            CommandKind::Set => {
                let (value, n) = String::decode_from(&buf[off..])?;
                off += n;
                value
            }
            CommandKind::Delete => String::new(),
        };
        Ok((Self { key, value, kind }, off))
    }
}

/// Serializes a command into a fresh buffer.
pub fn encode(cmd: &Command) -> Result<Vec<u8>, CommandError> {
    Ok(encoding::encode_to_vec(cmd)?)
}

/// Decodes exactly one command occupying the whole of `bytes`.
///
/// Fails with [`CommandError::CorruptRecord`] if a declared length runs past
/// the buffer, the kind tag is unknown, or bytes are left over.
pub fn decode(bytes: &[u8]) -> Result<Command, CommandError> {
    let (cmd, consumed) = encoding::decode_from_slice::<Command>(bytes)?;
    if consumed != bytes.len() {
        return Err(EncodingError::Custom(format!(
            "{} trailing bytes after command",
            bytes.len() - consumed
        ))
        .into());
    }
    Ok(cmd)
}

/// Appends `cmd` to `buf` as a `[u32 len][command]` frame.
pub fn encode_framed(cmd: &Command, buf: &mut Vec<u8>) -> Result<(), CommandError> {
    let body = encode(cmd)?;
    encoding::write_frame(buf, &body)?;
    Ok(())
}

/// Decodes every framed command in `buf`, in order.
pub fn decode_framed_all(buf: &[u8]) -> Result<Vec<Command>, CommandError> {
    encoding::frames(buf)
        .map(|frame| decode(frame?))
        .collect()
}
