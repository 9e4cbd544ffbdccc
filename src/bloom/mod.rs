//! Per-block bloom filter.
//!
//! Every data block carries a small bloom filter over its keys so that a
//! point lookup can rule a block out without reading it from disk.
//!
//! ## Probe sequence
//!
//! One call to [`encoding::hash`] per key seeds `k` probes (double hashing):
//!
//! ```text
//! h = hash(key)
//! repeat k times:
//!     idx   = h mod bit_len            (non-negative)
//!     set / test bit idx
//!     delta = (h >> 17) | (h << 15)    (32-bit, arithmetic shift)
//!     h     = h + delta                (wrapping)
//! ```
//!
//! The sequence is part of the on-disk format: a filter generated by the
//! writer must probe identically in the reader, so all arithmetic is pinned
//! to `i32`.
//!
//! ## Sizing
//!
//! `bit_len = max(round_up_8(key_count * bits_per_key), 64)`; the filter
//! is serialized as exactly `bit_len / 8` bytes, so the bit length of a
//! filter read back from disk is simply `bytes.len() * 8`.
//!
//! ## Lifecycle
//!
//! A filter exists only after it has been [generated](BloomFilter::generate)
//! from a closed batch of keys or [restored](BloomFilter::from_bytes) from
//! its serialized bits; there is no empty filter to query by mistake.


use crate::encoding::{self, EncodingError};

/// Minimum filter size in bits.
pub const MIN_BLOOM_BITS: usize = 64;

/// Immutable bloom filter over a batch of byte keys.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// Number of probes per key.
    k: u32,

    /// Bit array, bit `i` lives in `bits[i / 8]` at position `i % 8`.
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Builds a filter containing every key in `keys`.
    ///
    /// `bits_per_key` controls density (and thus the false-positive rate);
    /// `k` is the number of probes per key.
    pub fn generate<K: AsRef<[u8]>>(keys: &[K], k: u32, bits_per_key: u32) -> Self {
        let bit_len = Self::bit_len_for(keys.len(), bits_per_key);
        let mut filter = Self {
            k,
            bits: vec![0u8; bit_len / 8],
        };

        for key in keys {
            let mut h = encoding::hash(key.as_ref());
            for _ in 0..k {
                let idx = probe_index(h, bit_len);
                filter.bits[idx / 8] |= 1 << (idx % 8);
                h = next_probe(h);
            }
        }

        filter
    }

    /// Restores a filter from serialized bits produced by [`as_bytes`](Self::as_bytes).
    ///
    /// `k` must match the value the filter was generated with.
    pub fn from_bytes(bits: Vec<u8>, k: u32) -> Result<Self, EncodingError> {
        if bits.is_empty() {
            return Err(EncodingError::Custom("empty bloom filter".into()));
        }
        Ok(Self { k, bits })
    }

    /// Returns `false` if `key` was definitely not in the generating batch,
    /// `true` if it may have been.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        probe(&self.bits, self.k, key)
    }

    /// Number of bits in the filter.
    pub fn bit_len(&self) -> usize {
        self.bits.len() * 8
    }

    /// Number of probes per key.
    pub fn hash_count(&self) -> u32 {
        self.k
    }

    /// Serialized filter bits.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bits
    }

    /// Bit length for `key_count` keys: at least [`MIN_BLOOM_BITS`],
    /// rounded up to a whole byte.
    pub fn bit_len_for(key_count: usize, bits_per_key: u32) -> usize {
        let raw = key_count.saturating_mul(bits_per_key as usize);
        raw.div_ceil(8).saturating_mul(8).max(MIN_BLOOM_BITS)
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("k", &self.k)
            .field("bit_len", &self.bit_len())
            .finish()
    }
}

/// Tests `key` against serialized filter bits without building a
/// [`BloomFilter`].
///
/// An empty bit array cannot exclude anything and answers `true`.
pub fn probe(bits: &[u8], k: u32, key: &[u8]) -> bool {
    if bits.is_empty() {
        return true;
    }
    let bit_len = bits.len() * 8;
    let mut h = encoding::hash(key);
    for _ in 0..k {
        let idx = probe_index(h, bit_len);
        if bits[idx / 8] & (1 << (idx % 8)) == 0 {
            return false;
        }
        h = next_probe(h);
    }
    true
}

/// Maps `h` into `[0, bit_len)`, treating `h` as a signed 32-bit value.
#[inline]
fn probe_index(h: i32, bit_len: usize) -> usize {
    (h as i64).rem_euclid(bit_len as i64) as usize
}

#[inline]
fn next_probe(h: i32) -> i32 {
    let delta = (h >> 17) | (h << 15);
    h.wrapping_add(delta)
}
