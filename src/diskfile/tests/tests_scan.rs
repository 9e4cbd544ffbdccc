//! Range scan tests.
//!
//! Coverage:
//! - Half-open `[start, stop)` semantics with all bound combinations.
//! - Empty and inverted ranges.
//! - Lazy block loading: a corrupted block outside the range is never read.
//! - Error yielded once, then the iterator is exhausted.
//! - `seek_to` forwards, backwards, past the stop bound and after an error.
//! - `Arc`-owned scans outliving the original handle.
//! - Randomized comparison against a `BTreeMap` range.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use rand::{Rng, SeedableRng, rngs::StdRng};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::DiskFileConfig;
    use crate::diskfile::{DiskFile, DiskFileError, DiskFileWriter, ScanIterator};
    use crate::record::KeyValue;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn config() -> DiskFileConfig {
        DiskFileConfig {
            block_size_limit: 35,
            ..DiskFileConfig::default()
        }
    }

    fn build(dir: &Path, keys: &[&str]) -> PathBuf {
        let path = dir.join("scan.sst");
        let mut writer = DiskFileWriter::create(&path, config()).unwrap();
        for k in keys {
            writer.append(KeyValue::put(*k, "v")).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn corrupt_block(path: &Path, block_offset: u64) {
        let mut bytes = fs::read(path).unwrap();
        bytes[block_offset as usize + 6] ^= 0xFF;
        fs::write(path, bytes).unwrap();
    }

    fn keys<S>(iter: ScanIterator<S>) -> Vec<String>
    where
        S: std::ops::Deref<Target = DiskFile>,
    {
        iter.map(|kv| String::from_utf8(kv.unwrap().key().to_vec()).unwrap())
            .collect()
    }

    fn scan_keys(file: &DiskFile, start: Option<&str>, stop: Option<&str>) -> Vec<String> {
        keys(file.scan(start.map(str::as_bytes), stop.map(str::as_bytes)))
    }

    #[test]
    fn bound_combinations() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let file = DiskFile::open(build(tmp.path(), &["a", "b", "c", "d", "e"]), config()).unwrap();

        assert_eq!(scan_keys(&file, None, None), ["a", "b", "c", "d", "e"]);
        assert_eq!(scan_keys(&file, Some("b"), Some("d")), ["b", "c"]);
        assert_eq!(scan_keys(&file, Some("b"), None), ["b", "c", "d", "e"]);
        assert_eq!(scan_keys(&file, None, Some("c")), ["a", "b"]);
        assert_eq!(scan_keys(&file, Some("bb"), Some("dd")), ["c", "d"]);
        assert_eq!(scan_keys(&file, Some(""), Some("z")), ["a", "b", "c", "d", "e"]);
        assert_eq!(scan_keys(&file, Some("e"), None), ["e"]);
        assert_eq!(scan_keys(&file, None, Some("a\0")), ["a"]);
    }

    #[test]
    fn empty_ranges() {
        let tmp = TempDir::new().unwrap();
        let file = DiskFile::open(build(tmp.path(), &["a", "b", "c", "d", "e"]), config()).unwrap();

        assert!(scan_keys(&file, Some("c"), Some("c")).is_empty());
        assert!(scan_keys(&file, Some("d"), Some("b")).is_empty());
        assert!(scan_keys(&file, Some("f"), None).is_empty());
        assert!(scan_keys(&file, None, Some("a")).is_empty());
        assert!(scan_keys(&file, Some("bb"), Some("bc")).is_empty());
    }

    #[test]
    fn iter_equals_unbounded_scan() {
        let tmp = TempDir::new().unwrap();
        let file = DiskFile::open(build(tmp.path(), &["k1", "k2", "k3"]), config()).unwrap();
        assert_eq!(keys(file.iter()), scan_keys(&file, None, None));
    }

    /// # Scenario
    /// Blocks outside the scan range are never loaded.
    ///
    /// # Starting environment
    /// Blocks `[a, b]`, `[c, d]`, `[e]`; block 2 (`[e]`) corrupted.
    ///
    /// # Expected behavior
    /// Scans ending before `e` succeed; a scan reaching `e` yields the
    /// checksum error once and then ends.
    #[test]
    fn scan_reads_blocks_lazily() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = build(tmp.path(), &["a", "b", "c", "d", "e"]);
        corrupt_block(&path, 60);
        let file = DiskFile::open(&path, config()).unwrap();

        assert_eq!(scan_keys(&file, Some("a"), Some("d")), ["a", "b", "c"]);
        assert_eq!(scan_keys(&file, Some("c"), Some("cz")), ["c"]);

        let mut iter = file.iter();
        for expected in ["a", "b", "c", "d"] {
            assert_eq!(iter.next().unwrap().unwrap().key(), expected.as_bytes());
        }
        match iter.next() {
            Some(Err(DiskFileError::ChecksumMismatch { offset, .. })) => assert_eq!(offset, 60),
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn scan_skips_blocks_before_start() {
        let tmp = TempDir::new().unwrap();
        let path = build(tmp.path(), &["a", "b", "c", "d", "e"]);
        corrupt_block(&path, 0);
        let file = DiskFile::open(&path, config()).unwrap();

        assert_eq!(scan_keys(&file, Some("c"), None), ["c", "d", "e"]);
        assert_eq!(scan_keys(&file, Some("bb"), Some("e")), ["c", "d"]);

        let first = file.iter().next().unwrap();
        assert!(matches!(first, Err(DiskFileError::ChecksumMismatch { .. })));
    }

    #[test]
    fn seek_to_repositions() {
        let tmp = TempDir::new().unwrap();
        let file = DiskFile::open(build(tmp.path(), &["a", "b", "c", "d", "e"]), config()).unwrap();

        let mut iter = file.iter();
        assert_eq!(iter.next().unwrap().unwrap().key(), b"a");

        // Forwards into another block.
        iter.seek_to(b"d");
        assert_eq!(iter.start(), Some(b"d".as_slice()));
        assert_eq!(iter.next().unwrap().unwrap().key(), b"d");

        // Backwards, to a key that is absent.
        iter.seek_to(b"bb");
        assert_eq!(keys(iter), ["c", "d", "e"]);
    }

    #[test]
    fn seek_to_respects_stop() {
        let tmp = TempDir::new().unwrap();
        let file = DiskFile::open(build(tmp.path(), &["a", "b", "c", "d", "e"]), config()).unwrap();

        let mut iter = file.scan(None, Some(b"d".as_slice()));
        iter.seek_to(b"b");
        assert_eq!(iter.stop(), Some(b"d".as_slice()));

        let mut collected = Vec::new();
        for kv in iter.by_ref() {
            collected.push(kv.unwrap());
        }
        assert_eq!(collected, [KeyValue::put("b", "v"), KeyValue::put("c", "v")]);

        iter.seek_to(b"d");
        assert!(iter.next().is_none());
        iter.seek_to(b"z");
        assert!(iter.next().is_none());
    }

    #[test]
    fn seek_to_recovers_after_error() {
        let tmp = TempDir::new().unwrap();
        let path = build(tmp.path(), &["a", "b", "c", "d", "e"]);
        corrupt_block(&path, 30);
        let file = DiskFile::open(&path, config()).unwrap();

        let mut iter = file.iter();
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());

        iter.seek_to(b"e");
        assert_eq!(keys(iter), ["e"]);
    }

    fn owned_scan(file: Arc<DiskFile>, start: &[u8]) -> ScanIterator<Arc<DiskFile>> {
        ScanIterator::new(file, Some(start), None)
    }

    #[test]
    fn owned_scan_outlives_handle() {
        let tmp = TempDir::new().unwrap();
        let path = build(tmp.path(), &["a", "b", "c", "d", "e"]);
        let arc = Arc::new(DiskFile::open(path, config()).unwrap());

        let borrowed = scan_keys(&arc, Some("b"), None);
        let iter = owned_scan(Arc::clone(&arc), b"b");
        drop(arc);

        assert_eq!(keys(iter), borrowed);
    }

    #[test]
    fn owned_scan_is_static() {
        fn assert_static<T: 'static>(_: &T) {}

        let tmp = TempDir::new().unwrap();
        let arc = Arc::new(DiskFile::open(build(tmp.path(), &["a"]), config()).unwrap());
        let iter = owned_scan(arc, b"");
        assert_static(&iter);
        assert_eq!(keys(iter), ["a"]);
    }

    #[test]
    fn random_ranges_match_btreemap() {
        init_tracing();
        let mut rng = StdRng::seed_from_u64(0x5ca9);
        let mut model = BTreeMap::new();
        while model.len() < 400 {
            let len = rng.random_range(1..6);
            let key: Vec<u8> = (0..len).map(|_| rng.random_range(b'a'..=b'f')).collect();
            let value: Vec<u8> = (0..rng.random_range(0..20)).map(|_| rng.random()).collect();
            model.insert(key, value);
        }

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("random.sst");
        let cfg = DiskFileConfig {
            block_size_limit: 200,
            ..DiskFileConfig::default()
        };
        let mut writer = DiskFileWriter::create(&path, cfg.clone()).unwrap();
        for (k, v) in &model {
            writer.append(KeyValue::put(k.clone(), v.clone())).unwrap();
        }
        writer.finish().unwrap();
        let file = DiskFile::open(&path, cfg).unwrap();
        assert!(file.block_count() > 1);

        for _ in 0..200 {
            let mut a: Vec<u8> = (0..rng.random_range(0..4))
                .map(|_| rng.random_range(b'a'..=b'g'))
                .collect();
            let mut b: Vec<u8> = (0..rng.random_range(0..4))
                .map(|_| rng.random_range(b'a'..=b'g'))
                .collect();
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }

            let expected: Vec<(Vec<u8>, Vec<u8>)> = model
                .range(a.clone()..b.clone())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let actual: Vec<(Vec<u8>, Vec<u8>)> = file
                .scan(Some(a.as_slice()), Some(b.as_slice()))
                .map(|kv| {
                    let kv = kv.unwrap();
                    (kv.key().to_vec(), kv.value().to_vec())
                })
                .collect();
            assert_eq!(actual, expected, "range {a:?}..{b:?}");
        }
    }
}
