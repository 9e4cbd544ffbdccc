//! Disk File Module
//!
//! This module implements an **immutable**, **disk-backed** sorted key-value
//! file: the unit an LSM-tree flushes a sorted run into and later serves
//! point lookups and range scans from.
//!
//! ## Design Overview
//!
//! Records are written in strictly increasing key order and grouped into
//! size-bounded **data blocks**. Each block carries its own bloom filter
//! (stored in the block index, not in the block) and a CRC32 checksum. After
//! the last block, the **block index** lists one [`BlockMeta`] per block, and
//! a fixed-size **trailer** at the very end of the file points at the index.
//!
//! A reader starts from the trailer, so a file can be opened without
//! scanning it from the front.
//!
//! # On-disk layout
//!
//! ```text
//! [DATA_BLOCK: record_count u32 | record … record | crc32 u32]
//! [DATA_BLOCK: record_count u32 | record … record | crc32 u32]
//! ...
//! [BLOCK_INDEX: block_meta … block_meta]
//! [TRAILER: magic u64 | block_count u32 | index_offset u64 | index_size u64 | file_size u64]
//! ```
//!
//! All integers are big-endian. A block meta is
//! `last_record | block_offset u64 | block_size u64 | bloom_len u32 | bloom bytes`.
//!
//! # Sub-modules
//!
//! - [`block`] — [`BlockWriter`] and block decoding.
//! - [`index`] — [`BlockMeta`] and [`BlockIndexWriter`].
//! - [`builder`] — [`DiskFileWriter`], the sequential write path.
//! - [`iterator`] — [`ScanIterator`] for range scans.
//!
//! # Concurrency model
//!
//! - A file under construction belongs to a single [`DiskFileWriter`].
//! - An opened [`DiskFile`] is immutable: the mapping and the decoded block
//!   index are only read, so it is `Send + Sync` and can be shared through
//!   an `Arc` by any number of readers without locking.
//! - Every lookup or scan decodes its own copy of a block; nothing mutable
//!   crosses a call boundary.
//!
//! # Guarantees
//!
//! - **Immutability:** once the trailer is written the file never changes.
//! - **Integrity:** every data block is CRC32-checksummed; the trailer is
//!   validated against the magic number and the real file length.
//! - **Fast negative lookups:** a bloom filter miss answers "absent"
//!   without touching the data block.
//! - **No partial files:** a writer that fails never writes a trailer, so
//!   the leftovers are rejected by [`DiskFile::open`].

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod block;
pub mod builder;
pub mod index;
pub mod iterator;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports — public API surface
// ------------------------------------------------------------------------------------------------

pub use block::{BlockWriter, SealedBlock};
pub use builder::DiskFileWriter;
pub use index::{BlockIndexWriter, BlockMeta};
pub use iterator::ScanIterator;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::DiskFileConfig;
use crate::bloom::BloomFilter;
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::record::KeyValue;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic number stored in every trailer.
pub const DISK_FILE_MAGIC: u64 = 0xFAC8_8123_4221_FFA9;

/// Default number of bloom filter probes per key.
pub const DEFAULT_BLOOM_HASH_COUNT: u32 = 3;

/// Default bloom filter density.
pub const DEFAULT_BLOOM_BITS_PER_KEY: u32 = 10;

/// Default soft ceiling for a serialized data block (2 MiB).
pub const DEFAULT_BLOCK_SIZE_LIMIT: usize = 2 * 1024 * 1024;

/// Fixed trailer size: `magic(8) | block_count(4) | index_offset(8) | index_size(8) | file_size(8)`.
pub const TRAILER_SIZE: usize = 8 + 4 + 8 + 8 + 8;

/// Size of the record-count prefix of a data block.
pub const BLOCK_COUNT_SIZE: usize = 4;

/// Size of the CRC32 suffix of a data block.
pub const BLOCK_CHECKSUM_SIZE: usize = 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by disk file operations (write, open, read).
#[derive(Debug, Error)]
pub enum DiskFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record was appended whose key is not strictly greater than the
    /// previous one.
    #[error("ordering violation: key {offending:?} is not greater than previous key {previous:?}")]
    OrderingViolation {
        /// Key of the last accepted record.
        previous: Vec<u8>,
        /// Key of the rejected record.
        offending: Vec<u8>,
    },

    /// A record's key or value is longer than a reader will decode.
    #[error("record too large: key {key_len} bytes, value {value_len} bytes (limit {limit})")]
    RecordTooLarge {
        /// Length of the rejected key.
        key_len: usize,
        /// Length of the rejected value.
        value_len: usize,
        /// Largest accepted key or value length.
        limit: u32,
    },

    /// The writer was already sealed or finished.
    #[error("writer is sealed")]
    SealedWriter,

    /// On-disk bytes do not decode into the expected structure.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// The file is not a valid disk file (bad trailer, magic or size).
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A data block failed checksum verification.
    #[error(
        "checksum mismatch in block at offset {offset}: \
         stored {expected:#010x}, computed {actual:#010x}"
    )]
    ChecksumMismatch {
        /// File offset of the block.
        offset: u64,
        /// Checksum stored in the block.
        expected: u32,
        /// Checksum computed over the block payload.
        actual: u32,
    },

    /// Rejected configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EncodingError> for DiskFileError {
    fn from(e: EncodingError) -> Self {
        DiskFileError::CorruptData(e.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// Trailer
// ------------------------------------------------------------------------------------------------

/// Fixed-size trailer stored in the last [`TRAILER_SIZE`] bytes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Format sanity check; must equal the configured magic.
    pub magic: u64,

    /// Number of data blocks (and index entries).
    pub block_count: u32,

    /// File offset of the block index.
    pub block_index_offset: u64,

    /// Length of the block index in bytes.
    pub block_index_size: u64,

    /// Total file length, trailer included.
    pub file_size: u64,
}

impl Trailer {
    /// Checks the trailer against the expected magic and the real file length.
    fn validate(&self, magic: u64, actual_len: u64) -> Result<(), DiskFileError> {
        if self.magic != magic {
            return Err(DiskFileError::InvalidFormat(format!(
                "magic mismatch: found {:#018x}, expected {magic:#018x}",
                self.magic
            )));
        }
        if self.file_size != actual_len {
            return Err(DiskFileError::InvalidFormat(format!(
                "trailer records file size {} but file is {actual_len} bytes",
                self.file_size
            )));
        }
        let index_end = self
            .block_index_offset
            .checked_add(self.block_index_size)
            .ok_or_else(|| DiskFileError::InvalidFormat("block index range overflows".into()))?;
        if index_end != actual_len - TRAILER_SIZE as u64 {
            return Err(DiskFileError::InvalidFormat(format!(
                "block index [{}, {index_end}) does not end at the trailer",
                self.block_index_offset
            )));
        }
        Ok(())
    }
}

impl Encode for Trailer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.block_count.encode_to(buf)?;
        self.block_index_offset.encode_to(buf)?;
        self.block_index_size.encode_to(buf)?;
        self.file_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Trailer {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (block_count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (block_index_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (block_index_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (file_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                block_count,
                block_index_offset,
                block_index_size,
                file_size,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// DiskFile — immutable reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, immutable disk file opened for reading.
pub struct DiskFile {
    /// Path the file was opened from.
    path: PathBuf,

    /// Read-only mapping of the whole file.
    mmap: Mmap,

    /// Decoded trailer.
    trailer: Trailer,

    /// Block index, strictly increasing by last key.
    index: Vec<BlockMeta>,

    /// Bloom filter of each block, restored from the index.
    blooms: Vec<BloomFilter>,
}

impl DiskFile {
    /// Opens a disk file, validates its trailer and loads the block index.
    ///
    /// # Errors
    ///
    /// - [`DiskFileError::InvalidFormat`] if the file is shorter than a
    ///   trailer, the magic does not match, the recorded file size differs
    ///   from the real one, the index range does not end at the trailer, or
    ///   the block count disagrees with the index.
    /// - [`DiskFileError::CorruptData`] if the index does not decode or is
    ///   not strictly ordered, or a block range points outside the data
    ///   region.
    ///
    /// # Bloom probe count
    ///
    /// The number of bloom probes is not stored in the file. `config` must
    /// carry the `bloom_hash_count` the file was written with: with any
    /// other value the filters answer "absent" for keys the file holds, and
    /// [`get`](Self::get) returns `None` for them without reporting an error.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`. The mapping is read-only and the
    /// file is never written after its trailer, and every block range is
    /// bounds-checked before slicing.
    pub fn open(path: impl AsRef<Path>, config: DiskFileConfig) -> Result<Self, DiskFileError> {
        config.validate()?;
        let path = path.as_ref();
        let file = File::open(path)?;

        let actual_len = file.metadata()?.len();
        if actual_len < TRAILER_SIZE as u64 {
            return Err(DiskFileError::InvalidFormat(format!(
                "file is {actual_len} bytes, shorter than the {TRAILER_SIZE}-byte trailer"
            )));
        }

        let mmap = unsafe { Mmap::map(&file)? };

        let trailer_start = mmap.len() - TRAILER_SIZE;
        let (trailer, _) = encoding::decode_from_slice::<Trailer>(&mmap[trailer_start..])?;
        trailer.validate(config.magic, actual_len)?;

        let index_bytes = encoding::slice(
            &mmap,
            to_usize(trailer.block_index_offset)?,
            to_usize(trailer.block_index_size)?,
        )?;
        let index = index::parse_index(index_bytes, trailer.block_count)?;

        for meta in &index {
            let end = meta.block_offset().checked_add(meta.block_size());
            if end.is_none_or(|end| end > trailer.block_index_offset) {
                return Err(DiskFileError::CorruptData(format!(
                    "block [{}, +{}) reaches past the data region",
                    meta.block_offset(),
                    meta.block_size()
                )));
            }
        }

        let blooms = index
            .iter()
            .map(|meta| {
                BloomFilter::from_bytes(meta.bloom_filter().to_vec(), config.bloom_hash_count)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            path = %path.display(),
            blocks = trailer.block_count,
            file_size = trailer.file_size,
            "opened disk file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            trailer,
            index,
            blooms,
        })
    }

    /// Looks up the record stored under `key`.
    ///
    /// # Lookup pipeline
    ///
    /// 1. **Find the block** — binary search for the first block whose
    ///    last key is `>= key`. No such block means the key is past the end
    ///    of the file.
    /// 2. **Bloom filter** — a miss answers `None` without reading the block.
    /// 3. **Read the block** — checksum verified, records decoded.
    /// 4. **Search the block** — binary search for an exact key match.
    ///
    /// Delete markers are returned as records; interpreting them is the
    /// caller's job.
    pub fn get(&self, key: &[u8]) -> Result<Option<KeyValue>, DiskFileError> {
        let Some(block_idx) = self.find_block_for_key(key) else {
            trace!(key_len = key.len(), "get: key beyond last block");
            return Ok(None);
        };

        if !self.bloom_may_contain(block_idx, key) {
            trace!(block = block_idx, "get: bloom filter miss");
            return Ok(None);
        }

        let mut records = self.read_block(block_idx)?;
        match records.binary_search_by(|kv| kv.key().cmp(key)) {
            Ok(pos) => Ok(Some(records.swap_remove(pos))),
            Err(_) => {
                trace!(block = block_idx, "get: bloom false positive");
                Ok(None)
            }
        }
    }

    /// Returns a lazy iterator over records with `start <= key < stop`.
    ///
    /// `None` bounds are unbounded. Blocks are read one at a time as the
    /// iterator advances; an error ends the iteration after being yielded.
    pub fn scan(&self, start: Option<&[u8]>, stop: Option<&[u8]>) -> ScanIterator<&DiskFile> {
        ScanIterator::new(self, start, stop)
    }

    /// Iterates over every record in the file.
    pub fn iter(&self) -> ScanIterator<&DiskFile> {
        self.scan(None, None)
    }

    /// Checks the bloom filter of block `block_idx` for `key`.
    ///
    /// An out-of-range block index answers `false`.
    pub fn bloom_may_contain(&self, block_idx: usize, key: &[u8]) -> bool {
        self.blooms
            .get(block_idx)
            .is_some_and(|bloom| bloom.contains(key))
    }

    /// Reads, checksums and decodes the data block at `block_idx`.
    pub(crate) fn read_block(&self, block_idx: usize) -> Result<Vec<KeyValue>, DiskFileError> {
        let meta = self.index.get(block_idx).ok_or_else(|| {
            DiskFileError::Internal(format!(
                "block {block_idx} out of range ({} blocks)",
                self.index.len()
            ))
        })?;

        let bytes = encoding::slice(
            &self.mmap,
            to_usize(meta.block_offset())?,
            to_usize(meta.block_size())?,
        )?;

        block::decode_block(bytes, meta.block_offset()).inspect_err(|e| {
            if matches!(e, DiskFileError::ChecksumMismatch { .. }) {
                warn!(path = %self.path.display(), block = block_idx, %e, "data block corrupted");
            }
        })
    }

    /// Index of the first block whose last key is `>= key`, if any.
    pub(crate) fn find_block_for_key(&self, key: &[u8]) -> Option<usize> {
        let idx = self
            .index
            .partition_point(|meta| meta.last_key().key() < key);
        (idx < self.index.len()).then_some(idx)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Number of data blocks.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Total file length in bytes.
    pub fn file_size(&self) -> u64 {
        self.trailer.file_size
    }

    /// The decoded block index, in key order.
    pub fn block_metas(&self) -> &[BlockMeta] {
        &self.index
    }

    /// The record with the largest key, or `None` for an empty file.
    pub fn last_key(&self) -> Option<&KeyValue> {
        self.index.last().map(BlockMeta::last_key)
    }
}

impl std::fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFile")
            .field("path", &self.path)
            .field("trailer", &self.trailer)
            .finish()
    }
}

fn to_usize(v: u64) -> Result<usize, DiskFileError> {
    usize::try_from(v)
        .map_err(|_| DiskFileError::CorruptData(format!("offset {v} exceeds addressable range")))
}
