//! Deterministic binary encoding for everything lsmdb writes to disk.
//!
//! The [`Encode`] and [`Decode`] traits give every persisted structure a
//! hand-written, byte-stable wire format. Commands, sparse-index entries and
//! footers all go through this module, so a dependency upgrade can never
//! change what ends up in a `.wal` or `.sdb` file.
//!
//! # Wire format
//!
//! | Rust type          | Encoding                                     |
//! |--------------------|----------------------------------------------|
//! | `u8`               | 1 byte                                       |
//! | `u16`              | 2 bytes, little-endian                       |
//! | `u32`              | 4 bytes, little-endian                       |
//! | `u64`              | 8 bytes, little-endian                       |
//! | `[u8; N]`          | `N` raw bytes (no length prefix)             |
//! | `String` / `&str`  | `[u32 len][utf-8 bytes]`                     |
//!
//! # Frames
//!
//! Log records, compressed blocks and index entries are stored as
//! *frames*: a `u32` little-endian length followed by exactly that many
//! payload bytes. [`write_frame`] and [`read_frame`] implement this framing
//! for in-memory buffers. A frame with length zero is a terminator, never a
//! payload.
//!
//! # Safety limits
//!
//! Any length above [`MAX_BYTE_LEN`] is rejected on both sides. Encoding
//! fails before the bytes are written, and decoding fails before
//! allocating, so a corrupted length field cannot trigger a huge
//! allocation.


use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Size of the `u32` length prefix that precedes every frame.
pub const FRAME_HEADER_SIZE: usize = std::mem::size_of::<u32>();

/// Maximum byte length for a single string or frame payload (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// An enum discriminant was not recognised.
    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag {
        /// The tag value that was read.
        tag: u32,
        /// The Rust type being decoded.
        type_name: &'static str,
    },

    /// A byte sequence decoded as a string was not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length exceeded its safety limit or `u32::MAX`.
    #[error("length overflow: {0}")]
    LengthOverflow(String),

    /// Application-level decode error.
    #[error("{0}")]
    Custom(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` into a byte buffer.
///
/// Implementations must be deterministic: the same logical value always
/// yields the same bytes.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` so callers can walk a buffer holding
/// several encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`, returning `(value, consumed)`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// Frames: [u32 len][payload]
// ------------------------------------------------------------------------------------------------

/// Appends `payload` to `buf` as one frame.
pub fn write_frame(buf: &mut Vec<u8>, payload: &[u8]) -> Result<(), EncodingError> {
    let len = len_to_u32(payload.len())?;
    check_len(len, "frame")?;
    len.encode_to(buf)?;
    buf.extend_from_slice(payload);
    Ok(())
}

/// Reads one frame from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` is empty or starts with a zero-length
/// terminator, otherwise `(payload, total_bytes_consumed)`.
pub fn read_frame(buf: &[u8]) -> Result<Option<(&[u8], usize)>, EncodingError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let (len, header) = u32::decode_from(buf)?;
    if len == 0 {
        return Ok(None);
    }
    check_len(len, "frame")?;
    let len = len as usize;
    require(&buf[header..], len)?;
    Ok(Some((&buf[header..header + len], header + len)))
}

/// Iterates over consecutive frames in `buf` until it is exhausted or a
/// zero-length terminator is reached.
pub fn frames(buf: &[u8]) -> Frames<'_> {
    Frames { buf, failed: false }
}

/// Iterator returned by [`frames`].
pub struct Frames<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<&'a [u8], EncodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match read_frame(self.buf) {
            Ok(Some((payload, consumed))) => {
                self.buf = &self.buf[consumed..];
                Some(Ok(payload))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Rejects lengths above [`MAX_BYTE_LEN`]. Used on both the encode and the
/// decode side.
#[inline]
pub(crate) fn check_len(len: u32, what: &str) -> Result<(), EncodingError> {
    if len > MAX_BYTE_LEN {
        return Err(EncodingError::LengthOverflow(format!(
            "{what} length {len} exceeds MAX_BYTE_LEN ({MAX_BYTE_LEN})"
        )));
    }
    Ok(())
}

/// Convert a `usize` length to `u32`, failing with
/// [`EncodingError::LengthOverflow`] past `u32::MAX`.
#[inline]
pub(crate) fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

/// Copies the first `N` bytes of `buf` into an array.
#[inline]
fn take_array<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    require(buf, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(&buf[..N]);
    Ok(arr)
}

// ------------------------------------------------------------------------------------------------
// Unsigned integers
// ------------------------------------------------------------------------------------------------

macro_rules! impl_le_int {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                #[inline]
                fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                    buf.extend_from_slice(&self.to_le_bytes());
                    Ok(())
                }
            }

            impl Decode for $ty {
                #[inline]
                fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                    const SIZE: usize = std::mem::size_of::<$ty>();
                    let bytes = take_array::<SIZE>(buf)?;
                    Ok((<$ty>::from_le_bytes(bytes), SIZE))
                }
            }
        )*
    };
}

impl_le_int!(u8, u16, u32, u64);

// ------------------------------------------------------------------------------------------------
// Fixed-size byte arrays
// ------------------------------------------------------------------------------------------------

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((take_array::<N>(buf)?, N))
    }
}

// ------------------------------------------------------------------------------------------------
// Strings: [u32 len][utf-8 bytes]
// ------------------------------------------------------------------------------------------------

impl Encode for str {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let len = len_to_u32(self.len())?;
        check_len(len, "string")?;
        len.encode_to(buf)?;
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Encode for String {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_str().encode_to(buf)
    }
}

impl Decode for String {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, header) = u32::decode_from(buf)?;
        check_len(len, "string")?;
        let len = len as usize;
        require(&buf[header..], len)?;
        let s = String::from_utf8(buf[header..header + len].to_vec())?;
        Ok((s, header + len))
    }
}
