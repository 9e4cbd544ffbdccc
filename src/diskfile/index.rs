//! Block index — one [`BlockMeta`] per data block.
//!
//! The index is written after the last data block and decoded eagerly when
//! a file is opened. Entries are strictly increasing by last key, so the
//! block that may hold a key is the first one whose last key is `>=` it.
//!
//! ```text
//! [last_record][block_offset u64][block_size u64][bloom_len u32][bloom bytes]
//! ```

use crate::encoding::{Decode, Encode, EncodingError};
use crate::record::KeyValue;

use super::DiskFileError;

/// Fixed part of an encoded [`BlockMeta`] after the last record.
const BLOCK_META_FIXED_SIZE: usize = 8 + 8 + 4;

/// Metadata describing one data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    /// Record with the largest key in the block.
    last_key: KeyValue,

    /// File offset of the first byte of the block.
    block_offset: u64,

    /// Length of the block, count prefix and checksum included.
    block_size: u64,

    /// Serialized bloom filter over the block's keys.
    bloom_filter: Vec<u8>,
}

impl BlockMeta {
    pub fn new(
        last_key: KeyValue,
        block_offset: u64,
        block_size: u64,
        bloom_filter: Vec<u8>,
    ) -> Self {
        Self {
            last_key,
            block_offset,
            block_size,
            bloom_filter,
        }
    }

    pub fn last_key(&self) -> &KeyValue {
        &self.last_key
    }

    pub fn block_offset(&self) -> u64 {
        self.block_offset
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn bloom_filter(&self) -> &[u8] {
        &self.bloom_filter
    }

    /// Exact number of bytes [`to_bytes`](Self::to_bytes) produces.
    pub fn serialized_size(&self) -> usize {
        self.last_key.serialized_size() + BLOCK_META_FIXED_SIZE + self.bloom_filter.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.encode_to(&mut buf)?;
        Ok(buf)
    }

    /// Decodes one entry starting at `buf[offset]`.
    ///
    /// Returns the entry and the number of bytes it occupied.
    pub fn parse_from(buf: &[u8], offset: usize) -> Result<(Self, usize), EncodingError> {
        let rest = buf.get(offset..).ok_or(EncodingError::OutOfRange {
            offset,
            len: 0,
            available: buf.len(),
        })?;
        Self::decode_from(rest)
    }
}

impl Encode for BlockMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.last_key.encode_to(buf)?;
        self.block_offset.encode_to(buf)?;
        self.block_size.encode_to(buf)?;
        self.bloom_filter.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (last_key, n) = KeyValue::decode_from(buf)?;
        off += n;
        let (block_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (block_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (bloom_filter, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;

        if bloom_filter.is_empty() {
            return Err(EncodingError::Custom(
                "block meta has an empty bloom filter".into(),
            ));
        }
        Ok((
            Self {
                last_key,
                block_offset,
                block_size,
                bloom_filter,
            },
            off,
        ))
    }
}

/// Decodes a serialized block index.
///
/// The buffer must hold exactly `expected_count` entries, strictly
/// increasing by last key.
pub(crate) fn parse_index(
    buf: &[u8],
    expected_count: u32,
) -> Result<Vec<BlockMeta>, DiskFileError> {
    let mut metas: Vec<BlockMeta> = Vec::new();
    let mut pos = 0;

    while pos < buf.len() {
        let (meta, n) = BlockMeta::parse_from(buf, pos)?;
        pos += n;

        if let Some(prev) = metas.last() {
            if meta.last_key.cmp_key(&prev.last_key).is_le() {
                return Err(DiskFileError::CorruptData(format!(
                    "block index out of order at entry {}",
                    metas.len()
                )));
            }
        }
        metas.push(meta);
    }

    if metas.len() != expected_count as usize {
        return Err(DiskFileError::InvalidFormat(format!(
            "trailer declares {expected_count} blocks but index holds {}",
            metas.len()
        )));
    }
    Ok(metas)
}

// ------------------------------------------------------------------------------------------------
// BlockIndexWriter
// ------------------------------------------------------------------------------------------------

/// Append-only accumulator for the block index.
///
/// Entries must arrive in increasing key order; the writer checks but never
/// reorders.
#[derive(Debug, Default)]
pub struct BlockIndexWriter {
    metas: Vec<BlockMeta>,
    total_bytes: usize,
}

impl BlockIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry for a block that has been placed at `offset`.
    pub fn append(
        &mut self,
        last_key: KeyValue,
        offset: u64,
        size: u64,
        bloom_filter: Vec<u8>,
    ) -> Result<(), DiskFileError> {
        self.append_meta(BlockMeta::new(last_key, offset, size, bloom_filter))
    }

    /// Appends a ready-made entry.
    pub fn append_meta(&mut self, meta: BlockMeta) -> Result<(), DiskFileError> {
        if let Some(prev) = self.metas.last() {
            if meta.last_key.cmp_key(&prev.last_key).is_le() {
                return Err(DiskFileError::OrderingViolation {
                    previous: prev.last_key.key().to_vec(),
                    offending: meta.last_key.key().to_vec(),
                });
            }
        }

        self.total_bytes += meta.serialized_size();
        self.metas.push(meta);
        Ok(())
    }

    /// Concatenates all entries in append order.
    pub fn serialize(&self) -> Result<Vec<u8>, DiskFileError> {
        let mut buf = Vec::with_capacity(self.total_bytes);
        for meta in &self.metas {
            meta.encode_to(&mut buf)?;
        }
        if buf.len() != self.total_bytes {
            return Err(DiskFileError::Internal(format!(
                "serialized index is {} bytes, expected {}",
                buf.len(),
                self.total_bytes
            )));
        }
        Ok(buf)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    /// Serialized size of all entries so far.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn metas(&self) -> &[BlockMeta] {
        &self.metas
    }
}

