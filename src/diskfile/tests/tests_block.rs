//! Data block writer and decoder tests.
//!
//! Coverage:
//! - Sealed block layout: count prefix, records, CRC32 suffix.
//! - Size accounting and the overflow rule (empty blocks never overflow).
//! - Writer state: ordering, oversized records, sealing twice, appending
//!   after seal.
//! - Block bloom filter bits.
//! - `decode_block` rejection of short, mis-checksummed and mis-counted blocks.

#[cfg(test)]
mod tests {
    use crate::diskfile::block::{BlockWriter, decode_block};
    use crate::diskfile::{DEFAULT_BLOOM_BITS_PER_KEY, DEFAULT_BLOOM_HASH_COUNT, DiskFileError};
    use crate::encoding::MAX_BYTE_LEN;
    use crate::record::KeyValue;

    fn writer() -> BlockWriter {
        BlockWriter::new(DEFAULT_BLOOM_HASH_COUNT, DEFAULT_BLOOM_BITS_PER_KEY)
    }

    fn kv(key: &str) -> KeyValue {
        KeyValue::put(key, "v")
    }

    /// Rewrites the CRC suffix so that only the payload change is observed.
    fn refresh_crc(bytes: &mut [u8]) {
        let end = bytes.len() - 4;
        let crc = crc32fast::hash(&bytes[..end]);
        bytes[end..].copy_from_slice(&crc.to_be_bytes());
    }

    #[test]
    fn sealed_block_layout() {
        let mut w = writer();
        w.append(kv("a")).unwrap();
        w.append(KeyValue::delete("b")).unwrap();
        let sealed = w.seal().unwrap();

        let rec_a = kv("a").to_bytes().unwrap();
        let rec_b = KeyValue::delete("b").to_bytes().unwrap();

        let bytes = &sealed.bytes;
        assert_eq!(bytes.len(), 4 + rec_a.len() + rec_b.len() + 4);
        assert_eq!(&bytes[..4], &[0, 0, 0, 2]);
        assert_eq!(&bytes[4..4 + rec_a.len()], rec_a.as_slice());
        assert_eq!(&bytes[4 + rec_a.len()..bytes.len() - 4], rec_b.as_slice());

        let crc = crc32fast::hash(&bytes[..bytes.len() - 4]);
        assert_eq!(&bytes[bytes.len() - 4..], &crc.to_be_bytes());

        assert_eq!(sealed.record_count, 2);
        assert_eq!(sealed.last_key, KeyValue::delete("b"));
    }

    #[test]
    fn size_tracks_appends() {
        let mut w = writer();
        assert!(w.is_empty());
        assert_eq!(w.size(), 8);

        w.append(kv("a")).unwrap();
        assert_eq!(w.size(), 19);
        w.append(kv("b")).unwrap();
        assert_eq!(w.size(), 30);
        assert_eq!(w.record_count(), 2);
        assert_eq!(w.last_key(), Some(&kv("b")));

        let sealed = w.seal().unwrap();
        assert_eq!(sealed.bytes.len(), 30);
    }

    #[test]
    fn overflow_rule() {
        let mut w = writer();
        let huge = KeyValue::put("big", vec![0u8; 1024]);

        // An empty block accepts anything.
        assert!(!w.would_overflow(&huge, 16));

        w.append(kv("a")).unwrap();
        w.append(kv("b")).unwrap();
        // 30 + 11 = 41
        assert!(w.would_overflow(&kv("c"), 35));
        assert!(w.would_overflow(&kv("c"), 40));
        assert!(!w.would_overflow(&kv("c"), 41));
    }

    #[test]
    fn rejects_out_of_order_keys() {
        let mut w = writer();
        w.append(kv("b")).unwrap();

        for bad in ["a", "b"] {
            match w.append(kv(bad)) {
                Err(DiskFileError::OrderingViolation {
                    previous,
                    offending,
                }) => {
                    assert_eq!(previous, b"b");
                    assert_eq!(offending, bad.as_bytes());
                }
                other => panic!("expected OrderingViolation, got {other:?}"),
            }
        }

        // Still usable after a rejected record.
        w.append(kv("c")).unwrap();
        assert_eq!(w.record_count(), 2);
    }

    #[test]
    fn rejects_records_past_decode_limit() {
        let mut w = writer();
        w.append(kv("a")).unwrap();
        let size_before = w.size();

        let limit = MAX_BYTE_LEN as usize;
        let too_long = KeyValue::put("b", vec![0u8; limit + 1]);
        match w.append(too_long) {
            Err(DiskFileError::RecordTooLarge {
                key_len, value_len, ..
            }) => {
                assert_eq!(key_len, 1);
                assert_eq!(value_len, limit + 1);
            }
            other => panic!("expected RecordTooLarge, got {other:?}"),
        }

        // Nothing of the rejected record reached the block.
        assert_eq!(w.size(), size_before);
        assert_eq!(w.record_count(), 1);

        w.append(kv("b")).unwrap();
        let sealed = w.seal().unwrap();
        let records = decode_block(&sealed.bytes, 0).unwrap();
        assert_eq!(records, vec![kv("a"), kv("b")]);
    }

    #[test]
    fn sealed_block_into_meta() {
        let mut w = writer();
        w.append(kv("a")).unwrap();
        w.append(kv("b")).unwrap();
        let sealed = w.seal().unwrap();
        let bytes_len = sealed.bytes.len() as u64;

        let meta = sealed.into_meta(120);
        assert_eq!(meta.last_key(), &kv("b"));
        assert_eq!(meta.block_offset(), 120);
        assert_eq!(meta.block_size(), bytes_len);
        assert_eq!(meta.bloom_filter(), &[12, 0, 0, 0, 12, 0, 0, 0]);
    }

    #[test]
    fn sealing_empty_block_fails() {
        let mut w = writer();
        assert!(matches!(w.seal(), Err(DiskFileError::Internal(_))));
    }

    #[test]
    fn sealed_writer_rejects_further_use() {
        let mut w = writer();
        w.append(kv("a")).unwrap();
        w.seal().unwrap();

        assert!(matches!(w.append(kv("b")), Err(DiskFileError::SealedWriter)));
        assert!(matches!(w.seal(), Err(DiskFileError::SealedWriter)));
    }

    #[test]
    fn block_bloom_filter_bits() {
        let mut w = writer();
        w.append(kv("a")).unwrap();
        w.append(kv("b")).unwrap();
        let sealed = w.seal().unwrap();
        assert_eq!(sealed.bloom_filter, [12, 0, 0, 0, 12, 0, 0, 0]);
    }

    #[test]
    fn decode_roundtrip() {
        let records = vec![
            KeyValue::put("alpha", "1"),
            KeyValue::delete("beta"),
            KeyValue::put("gamma", ""),
        ];
        let mut w = writer();
        for r in &records {
            w.append(r.clone()).unwrap();
        }
        let sealed = w.seal().unwrap();

        assert_eq!(decode_block(&sealed.bytes, 0).unwrap(), records);
    }

    #[test]
    fn decode_detects_flipped_byte() {
        let mut w = writer();
        w.append(kv("a")).unwrap();
        let mut bytes = w.seal().unwrap().bytes;
        bytes[10] ^= 0x01;

        match decode_block(&bytes, 4096) {
            Err(DiskFileError::ChecksumMismatch {
                offset,
                expected,
                actual,
            }) => {
                assert_eq!(offset, 4096);
                assert_ne!(expected, actual);
            }
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_short_block() {
        for len in 0..8 {
            let bytes = vec![0u8; len];
            assert!(matches!(
                decode_block(&bytes, 0),
                Err(DiskFileError::CorruptData(_))
            ));
        }
    }

    #[test]
    fn decode_rejects_count_mismatch() {
        let mut w = writer();
        w.append(kv("a")).unwrap();
        w.append(kv("b")).unwrap();
        let original = w.seal().unwrap().bytes;

        // Fewer records declared than present: leftover bytes.
        let mut fewer = original.clone();
        fewer[3] = 1;
        refresh_crc(&mut fewer);
        assert!(matches!(
            decode_block(&fewer, 0),
            Err(DiskFileError::CorruptData(_))
        ));

        // More records declared than present: runs off the payload.
        let mut more = original;
        more[3] = 3;
        refresh_crc(&mut more);
        assert!(matches!(
            decode_block(&more, 0),
            Err(DiskFileError::CorruptData(_))
        ));
    }

    #[test]
    fn decode_empty_block_with_valid_crc() {
        // A zero-count block never comes out of the writer but is well formed.
        let mut bytes = vec![0, 0, 0, 0, 0, 0, 0, 0];
        refresh_crc(&mut bytes);
        assert!(decode_block(&bytes, 0).unwrap().is_empty());
    }
}
