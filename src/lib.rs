//! # sstfile
//!
//! Immutable, sorted, block-structured key-value files for an LSM-tree
//! storage engine. A file is written once from a sorted record stream and
//! then serves point lookups (with per-block bloom filters) and lazy range
//! scans.
//!
//! ## Quick Start
//!
//! ```rust
//! use sstfile::{DiskFile, DiskFileConfig, DiskFileWriter, KeyValue};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("000001.sst");
//!
//! // Write records in strictly increasing key order
//! let mut writer = DiskFileWriter::create(&path, DiskFileConfig::default()).unwrap();
//! writer.append(KeyValue::put("apple", "red")).unwrap();
//! writer.append(KeyValue::delete("banana")).unwrap();
//! writer.append(KeyValue::put("cherry", "dark")).unwrap();
//! writer.finish().unwrap();
//!
//! // Point lookups
//! let file = DiskFile::open(&path, DiskFileConfig::default()).unwrap();
//! assert_eq!(file.get(b"apple").unwrap().unwrap().value(), b"red");
//! assert!(file.get(b"banana").unwrap().unwrap().is_delete());
//! assert_eq!(file.get(b"durian").unwrap(), None);
//!
//! // Range scan over [apple, cherry)
//! let keys: Vec<Vec<u8>> = file
//!     .scan(Some(b"apple".as_slice()), Some(b"cherry".as_slice()))
//!     .map(|kv| kv.unwrap().key().to_vec())
//!     .collect();
//! assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec()]);
//! ```
//!
//! ## Features
//!
//! - **Size-bounded blocks**: records are grouped into data blocks of at
//!   most [`DiskFileConfig::block_size_limit`] bytes (an oversized record gets
//!   a block of its own).
//! - **Bloom filters**: one per block, kept in the block index, so a negative
//!   lookup never reads a data block.
//! - **CRC32 integrity**: every data block is checksummed and verified on read.
//! - **Self-locating**: a fixed-size trailer at the end of the file points at
//!   the block index.
//! - **Lock-free reads**: an opened [`DiskFile`] is immutable and can be shared
//!   across threads.

pub mod bloom;
pub mod diskfile;
pub mod encoding;
pub mod record;

pub use bloom::BloomFilter;
pub use diskfile::{
    DEFAULT_BLOCK_SIZE_LIMIT, DEFAULT_BLOOM_BITS_PER_KEY, DEFAULT_BLOOM_HASH_COUNT,
    DISK_FILE_MAGIC, DiskFile, DiskFileError, DiskFileWriter, ScanIterator, Trailer,
};
pub use encoding::EncodingError;
pub use record::{KeyValue, Op};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Tunables shared by the writer and the reader of a disk file.
///
/// All fields have sensible defaults via [`DiskFileConfig::default()`].
/// The configuration is validated by [`DiskFileWriter::create`] and
/// [`DiskFile::open`].
///
/// `magic` and `bloom_hash_count` are part of the file format: a reader must
/// use the same values the file was written with. `bloom_bits_per_key` and
/// `block_size_limit` only affect the writer.
///
/// # Example
///
/// ```rust
/// use sstfile::DiskFileConfig;
///
/// // Use defaults (2 MiB blocks, 3 bloom probes, 10 bits per key)
/// let config = DiskFileConfig::default();
///
/// // Or customize
/// let config = DiskFileConfig {
///     block_size_limit: 64 * 1024,
///     bloom_bits_per_key: 16,
///     ..DiskFileConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFileConfig {
    /// Magic number written to and expected in the trailer.
    ///
    /// Default: [`DISK_FILE_MAGIC`].
    pub magic: u64,

    /// Number of bloom filter probes per key.
    ///
    /// Not recorded in the file. A reader opened with a different value than
    /// the writer used gets silent false negatives from [`DiskFile::get`]:
    /// stored keys are reported absent.
    ///
    /// Default: 3. Must be in `1..=30`.
    pub bloom_hash_count: u32,

    /// Bloom filter bits allotted per key.
    ///
    /// Default: 10. Must be ≥ 1.
    pub bloom_bits_per_key: u32,

    /// Soft ceiling for a serialized data block, in bytes.
    ///
    /// A block is sealed before a record would push it past this size.
    ///
    /// Default: 2 MiB. Must be ≥ 16.
    pub block_size_limit: usize,
}

impl Default for DiskFileConfig {
    fn default() -> Self {
        Self {
            magic: DISK_FILE_MAGIC,
            bloom_hash_count: DEFAULT_BLOOM_HASH_COUNT,
            bloom_bits_per_key: DEFAULT_BLOOM_BITS_PER_KEY,
            block_size_limit: DEFAULT_BLOCK_SIZE_LIMIT,
        }
    }
}

impl DiskFileConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), DiskFileError> {
        if !(1..=30).contains(&self.bloom_hash_count) {
            return Err(DiskFileError::InvalidConfig(
                "bloom_hash_count must be in 1..=30".into(),
            ));
        }
        if self.bloom_bits_per_key < 1 {
            return Err(DiskFileError::InvalidConfig(
                "bloom_bits_per_key must be >= 1".into(),
            ));
        }
        if self.block_size_limit < 16 {
            return Err(DiskFileError::InvalidConfig(
                "block_size_limit must be >= 16".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
