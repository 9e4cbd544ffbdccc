//! Deterministic, zero-dependency binary encoding for the on-disk format.
//!
//! This module provides the [`Encode`] and [`Decode`] traits used by every
//! structure that reaches disk (records, block metadata, trailer), the
//! fixed-width integer helpers, bounds-checked slicing and the 32-bit key
//! hash that drives the per-block bloom filters.
//!
//! # Wire format
//!
//! | Rust type          | Encoding                                     |
//! |--------------------|----------------------------------------------|
//! | `u8`               | 1 byte                                       |
//! | `u32`              | 4 bytes, big-endian                          |
//! | `u64`              | 8 bytes, big-endian                          |
//! | `Vec<u8>` / bytes  | `[u32 len][bytes]`                           |
//!
//! All multi-byte integers are **big-endian**. Lengths are encoded as
//! `u32`, limiting individual items to 4 GiB.
//!
//! # Safety limits
//!
//! Every variable-length decoder rejects a length above [`MAX_BYTE_LEN`]
//! before allocating, so a corrupted length field cannot trigger a huge
//! allocation.
//!
//! # Zero-panic guarantee
//!
//! No function in this module uses `unwrap()`, `expect()`, or any other
//! panicking path. All errors are propagated via [`EncodingError`].
//!
//! # Hashing
//!
//! [`hash`] is part of the file format: bloom filters written by one process
//! are probed by another, so the function is pinned to 32-bit two's-complement
//! wraparound and must never change.


use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Safety limits
// ------------------------------------------------------------------------------------------------

/// Maximum byte length for a single length-prefixed byte sequence during
/// decoding (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A requested slice reaches past the end of the buffer.
    #[error("slice [{offset}, {offset}+{len}) out of range for buffer of {available} bytes")]
    OutOfRange {
        /// Start of the requested slice.
        offset: usize,
        /// Length of the requested slice.
        len: usize,
        /// Length of the buffer.
        available: usize,
    },

    /// A fixed-width integer was decoded from a slice of the wrong length.
    #[error("cannot decode {type_name} from {actual} bytes (expected {expected})")]
    Decode {
        /// The integer type being decoded.
        type_name: &'static str,
        /// Required slice length.
        expected: usize,
        /// Actual slice length.
        actual: usize,
    },

    /// An enum discriminant was not recognised.
    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag {
        /// The tag value that was read.
        tag: u32,
        /// The Rust type being decoded.
        type_name: &'static str,
    },

    /// A length exceeded its safety limit.
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
/// Implementations **must** produce deterministic output: the same
/// logical value always yields the exact same byte sequence.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` on success so that callers can
/// advance a cursor through a buffer containing multiple encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Convenience functions
// ------------------------------------------------------------------------------------------------

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`.
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

/// Returns `buf[offset..offset + len]`, or [`EncodingError::OutOfRange`]
/// when the range does not fit inside `buf`.
pub fn slice(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], EncodingError> {
    let out_of_range = EncodingError::OutOfRange {
        offset,
        len,
        available: buf.len(),
    };
    let end = offset.checked_add(len).ok_or_else(|| out_of_range.clone())?;
    buf.get(offset..end).ok_or(out_of_range)
}

/// Decodes a big-endian `u32` from a slice of exactly 4 bytes.
pub fn read_u32(bytes: &[u8]) -> Result<u32, EncodingError> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| EncodingError::Decode {
        type_name: "u32",
        expected: 4,
        actual: bytes.len(),
    })?;
    Ok(u32::from_be_bytes(arr))
}

/// Decodes a big-endian `u64` from a slice of exactly 8 bytes.
pub fn read_u64(bytes: &[u8]) -> Result<u64, EncodingError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| EncodingError::Decode {
        type_name: "u64",
        expected: 8,
        actual: bytes.len(),
    })?;
    Ok(u64::from_be_bytes(arr))
}

/// 32-bit multiplicative hash over `bytes` (`h = h * 33 + b`, seed 1).
///
/// Each byte is sign-extended before it is added, and all arithmetic
/// wraps at 32 bits.
pub fn hash(bytes: &[u8]) -> i32 {
    bytes
        .iter()
        .fold(1i32, |h, &b| h.wrapping_mul(33).wrapping_add(b as i8 as i32))
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes, returning
/// [`EncodingError::UnexpectedEof`] if not.
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

/// Convert a `usize` length to `u32`, returning [`EncodingError::LengthOverflow`]
/// if the value exceeds `u32::MAX`.
#[inline]
pub(crate) fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

// ------------------------------------------------------------------------------------------------
// Primitive implementations — unsigned integers
// ------------------------------------------------------------------------------------------------

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        Ok((buf[0], 1))
    }
}

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 4)?;
        Ok((read_u32(&buf[..4])?, 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 8)?;
        Ok((read_u64(&buf[..8])?, 8))
    }
}

// ------------------------------------------------------------------------------------------------
// Variable-length byte vectors: [u32 len][bytes]
// ------------------------------------------------------------------------------------------------

impl Encode for Vec<u8> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_slice().encode_to(buf)
    }
}

impl Decode for Vec<u8> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, offset) = u32::decode_from(buf)?;
        if len > MAX_BYTE_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "byte vector length {len} exceeds MAX_BYTE_LEN ({MAX_BYTE_LEN})"
            )));
        }
        let data = slice(buf, offset, len as usize)?.to_vec();
        Ok((data, offset + len as usize))
    }
}

/// Encode a byte slice as `[u32 len][bytes]`.
impl Encode for &[u8] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        len_to_u32(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}
