//! Data blocks — accumulation, sealing and decoding.
//!
//! A [`BlockWriter`] collects records in strictly increasing key order and
//! keeps a running CRC32 over the bytes it emits. [`BlockWriter::seal`]
//! freezes it, builds the block's bloom filter and returns the finished
//! bytes as a [`SealedBlock`]:
//!
//! ```text
//! [record_count u32][record][record]…[crc32 u32]
//! ```
//!
//! The checksum covers the count prefix and every record. The block does
//! not know its own file offset; the caller places it and records the
//! offset in the block index.

use crc32fast::Hasher as Crc32;

use crate::bloom::BloomFilter;
use crate::encoding::{self, Encode};
use crate::record::{KeyValue, RECORD_HEADER_SIZE};

use super::{BLOCK_CHECKSUM_SIZE, BLOCK_COUNT_SIZE, BlockMeta, DiskFileError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Open,
    Sealed,
}

/// Accumulates the records of one data block.
#[derive(Debug)]
pub struct BlockWriter {
    state: BlockState,

    /// Encoded records, in append order.
    buf: Vec<u8>,

    /// Running checksum over `buf`.
    crc: Crc32,

    /// Keys of all appended records, for the bloom filter.
    keys: Vec<Vec<u8>>,

    /// Most recently appended record (the block's maximum).
    last: Option<KeyValue>,

    bloom_hash_count: u32,
    bloom_bits_per_key: u32,
}

/// A finished block, ready to be written at some file offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlock {
    /// Complete block bytes, count prefix and checksum included.
    pub bytes: Vec<u8>,

    /// Record with the largest key in the block.
    pub last_key: KeyValue,

    /// Serialized bloom filter over the block's keys.
    pub bloom_filter: Vec<u8>,

    /// Number of records in the block.
    pub record_count: u32,
}

impl SealedBlock {
    /// Index entry for this block once it has been written at `offset`.
    pub fn into_meta(self, offset: u64) -> BlockMeta {
        BlockMeta::new(self.last_key, offset, self.bytes.len() as u64, self.bloom_filter)
    }
}

impl BlockWriter {
    pub fn new(bloom_hash_count: u32, bloom_bits_per_key: u32) -> Self {
        Self {
            state: BlockState::Open,
            buf: Vec::new(),
            crc: Crc32::new(),
            keys: Vec::new(),
            last: None,
            bloom_hash_count,
            bloom_bits_per_key,
        }
    }

    /// Appends `kv` to the block.
    ///
    /// # Errors
    ///
    /// - [`DiskFileError::SealedWriter`] after [`seal`](Self::seal).
    /// - [`DiskFileError::RecordTooLarge`] if the key or value exceeds
    ///   [`MAX_BYTE_LEN`](encoding::MAX_BYTE_LEN).
    /// - [`DiskFileError::OrderingViolation`] if `kv`'s key is not strictly
    ///   greater than the last appended key.
    pub fn append(&mut self, kv: KeyValue) -> Result<(), DiskFileError> {
        if self.state == BlockState::Sealed {
            return Err(DiskFileError::SealedWriter);
        }
        check_record_size(&kv)?;
        if let Some(last) = &self.last {
            if kv.cmp_key(last).is_le() {
                return Err(DiskFileError::OrderingViolation {
                    previous: last.key().to_vec(),
                    offending: kv.key().to_vec(),
                });
            }
        }

        let start = self.buf.len();
        if let Err(e) = kv.encode_to(&mut self.buf) {
            self.buf.truncate(start);
            return Err(e.into());
        }
        self.crc.update(&self.buf[start..]);

        self.keys.push(kv.key().to_vec());
        self.last = Some(kv);
        Ok(())
    }

    /// Returns `true` when `kv` should go into a fresh block: this block
    /// already holds records and appending would push it past `limit`.
    ///
    /// An empty block never overflows, so one oversized record still gets a
    /// block of its own.
    pub fn would_overflow(&self, kv: &KeyValue, limit: usize) -> bool {
        !self.is_empty() && self.size() + kv.serialized_size() > limit
    }

    /// Serialized size of the block if it were sealed now.
    pub fn size(&self) -> usize {
        BLOCK_COUNT_SIZE + self.buf.len() + BLOCK_CHECKSUM_SIZE
    }

    pub fn record_count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn last_key(&self) -> Option<&KeyValue> {
        self.last.as_ref()
    }

    /// Freezes the block and returns its bytes, last record and bloom filter.
    ///
    /// # Errors
    ///
    /// - [`DiskFileError::SealedWriter`] if already sealed.
    /// - [`DiskFileError::Internal`] if the block is empty.
    pub fn seal(&mut self) -> Result<SealedBlock, DiskFileError> {
        if self.state == BlockState::Sealed {
            return Err(DiskFileError::SealedWriter);
        }
        let Some(last_key) = self.last.take() else {
            return Err(DiskFileError::Internal("cannot seal an empty block".into()));
        };
        self.state = BlockState::Sealed;

        let record_count = encoding::len_to_u32(self.keys.len())?;
        let count_bytes = record_count.to_be_bytes();

        let mut crc = Crc32::new();
        crc.update(&count_bytes);
        crc.combine(&self.crc);
        let checksum = crc.finalize();

        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend_from_slice(&count_bytes);
        bytes.append(&mut self.buf);
        bytes.extend_from_slice(&checksum.to_be_bytes());

        let keys = std::mem::take(&mut self.keys);
        let bloom_filter =
            BloomFilter::generate(&keys, self.bloom_hash_count, self.bloom_bits_per_key)
                .into_bytes();

        Ok(SealedBlock {
            bytes,
            last_key,
            bloom_filter,
            record_count,
        })
    }
}

/// Rejects a record the reader would refuse to decode.
pub(crate) fn check_record_size(kv: &KeyValue) -> Result<(), DiskFileError> {
    if kv.within_decode_limits() {
        return Ok(());
    }
    Err(DiskFileError::RecordTooLarge {
        key_len: kv.key().len(),
        value_len: kv.value().len(),
        limit: encoding::MAX_BYTE_LEN,
    })
}

/// Verifies and decodes a data block read from `block_offset`.
///
/// # Errors
///
/// - [`DiskFileError::ChecksumMismatch`] if the trailing CRC32 does not
///   match the payload.
/// - [`DiskFileError::CorruptData`] if the block is too short, a record does
///   not decode, or the records do not fill the payload exactly.
pub fn decode_block(bytes: &[u8], block_offset: u64) -> Result<Vec<KeyValue>, DiskFileError> {
    if bytes.len() < BLOCK_COUNT_SIZE + BLOCK_CHECKSUM_SIZE {
        return Err(DiskFileError::CorruptData(format!(
            "block at offset {block_offset} is only {} bytes",
            bytes.len()
        )));
    }

    let payload_end = bytes.len() - BLOCK_CHECKSUM_SIZE;
    let payload = &bytes[..payload_end];
    let expected = encoding::read_u32(&bytes[payload_end..])?;
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(DiskFileError::ChecksumMismatch {
            offset: block_offset,
            expected,
            actual,
        });
    }

    let count = encoding::read_u32(&payload[..BLOCK_COUNT_SIZE])? as usize;
    let max_possible = (payload.len() - BLOCK_COUNT_SIZE) / RECORD_HEADER_SIZE;
    let mut records = Vec::with_capacity(count.min(max_possible));

    let mut pos = BLOCK_COUNT_SIZE;
    for _ in 0..count {
        let (kv, n) = KeyValue::parse_from(payload, pos)?;
        pos += n;
        records.push(kv);
    }

    if pos != payload.len() {
        return Err(DiskFileError::CorruptData(format!(
            "block at offset {block_offset}: {count} records end at byte {pos} of {}",
            payload.len()
        )));
    }
    Ok(records)
}
