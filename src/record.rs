//! Record type stored in a disk file.
//!
//! A [`KeyValue`] is either a put (key + value) or a delete marker for a key.
//! Records are ordered by key alone, byte-lexicographically; a single file
//! never holds two records with the same key.
//!
//! # Wire format
//!
//! ```text
//! [key_len u32][value_len u32][op u8][key bytes][value bytes]
//! ```
//!
//! The encoding is self-describing: a record can be decoded from any
//! position in a block without outside context.

use std::cmp::Ordering;

use crate::encoding::{self, Decode, Encode, EncodingError};

/// Bytes taken by the fixed part of an encoded record (two lengths + op).
pub const RECORD_HEADER_SIZE: usize = 4 + 4 + 1;

/// Kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// A key with its value.
    Put,

    /// A deletion marker. Carries no value.
    Delete,
}

impl Op {
    fn tag(self) -> u8 {
        match self {
            Op::Put => 0,
            Op::Delete => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, EncodingError> {
        match tag {
            0 => Ok(Op::Put),
            1 => Ok(Op::Delete),
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "Op",
            }),
        }
    }
}

/// An immutable key/value record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue {
    key: Vec<u8>,
    value: Vec<u8>,
    op: Op,
}

impl KeyValue {
    /// Creates a put record.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            op: Op::Put,
        }
    }

    /// Creates a delete marker for `key`.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            op: Op::Delete,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn is_delete(&self) -> bool {
        self.op == Op::Delete
    }

    /// Exact number of bytes [`to_bytes`](Self::to_bytes) produces.
    pub fn serialized_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// `true` if both key and value are at most [`encoding::MAX_BYTE_LEN`]
    /// bytes, the largest lengths [`Decode`] accepts.
    pub fn within_decode_limits(&self) -> bool {
        let limit = encoding::MAX_BYTE_LEN as usize;
        self.key.len() <= limit && self.value.len() <= limit
    }

    /// Orders two records by key bytes.
    pub fn cmp_key(&self, other: &KeyValue) -> Ordering {
        self.key.as_slice().cmp(other.key.as_slice())
    }

    /// Encodes the record into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.encode_to(&mut buf)?;
        Ok(buf)
    }

    /// Decodes the record starting at `buf[offset]`.
    ///
    /// Returns the record and the number of bytes it occupied.
    pub fn parse_from(buf: &[u8], offset: usize) -> Result<(Self, usize), EncodingError> {
        let rest = buf.get(offset..).ok_or(EncodingError::OutOfRange {
            offset,
            len: 0,
            available: buf.len(),
        })?;
        Self::decode_from(rest)
    }
}

impl Encode for KeyValue {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::len_to_u32(self.key.len())?.encode_to(buf)?;
        encoding::len_to_u32(self.value.len())?.encode_to(buf)?;
        self.op.tag().encode_to(buf)?;
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        Ok(())
    }
}

impl Decode for KeyValue {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key_len, n) = u32::decode_from(buf)?;
        off += n;
        let (value_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (tag, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let op = Op::from_tag(tag)?;

        if key_len > encoding::MAX_BYTE_LEN || value_len > encoding::MAX_BYTE_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "record lengths ({key_len}, {value_len}) exceed MAX_BYTE_LEN"
            )));
        }
        if op == Op::Delete && value_len != 0 {
            return Err(EncodingError::Custom(format!(
                "delete record carries a {value_len}-byte value"
            )));
        }

        let key = encoding::slice(buf, off, key_len as usize)?.to_vec();
        off += key.len();
        let value = encoding::slice(buf, off, value_len as usize)?.to_vec();
        off += value.len();

        Ok((Self { key, value, op }, off))
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
