//! Range scan over a single disk file.
//!
//! [`ScanIterator`] yields every record with `start <= key < stop` in key
//! order. Blocks are decoded lazily, one at a time, as the iterator crosses
//! into them; a scan that stops early never touches the remaining blocks.
//!
//! The iterator is generic over how it holds the file: `&DiskFile` for a
//! borrowed scan (what [`DiskFile::scan`] returns) or `Arc<DiskFile>` for a
//! scan that outlives the borrow.
//!
//! Errors (checksum mismatch, undecodable block) are yielded once, after
//! which the iterator is exhausted.

use std::{ops::Deref, vec};

use crate::record::KeyValue;

use super::{DiskFile, DiskFileError};

/// Forward iterator over records in `[start, stop)`.
pub struct ScanIterator<S: Deref<Target = DiskFile>> {
    /// Reference to (or owned handle on) the file being scanned.
    file: S,

    /// Inclusive lower bound, `None` = from the first record.
    start: Option<Vec<u8>>,

    /// Exclusive upper bound, `None` = to the last record.
    stop: Option<Vec<u8>>,

    /// Index of the next block to load.
    next_block: usize,

    /// Remaining records of the current block.
    current: vec::IntoIter<KeyValue>,

    /// Set once the range is exhausted or an error was yielded.
    done: bool,
}

impl<S: Deref<Target = DiskFile>> ScanIterator<S> {
    /// Creates an iterator over `start <= key < stop`.
    ///
    /// No block is read until the first call to `next`.
    pub fn new(file: S, start: Option<&[u8]>, stop: Option<&[u8]>) -> Self {
        let mut iter = Self {
            file,
            start: None,
            stop: stop.map(<[u8]>::to_vec),
            next_block: 0,
            current: Vec::new().into_iter(),
            done: false,
        };
        iter.position(start.map(<[u8]>::to_vec));
        iter
    }

    /// Repositions the iterator at the smallest record `>= key`.
    ///
    /// The upper bound is kept. Seeking also clears an earlier error, so a
    /// scan can resume at another key after hitting a bad block.
    pub fn seek_to(&mut self, key: &[u8]) {
        self.position(Some(key.to_vec()));
    }

    /// Inclusive lower bound of the scan.
    pub fn start(&self) -> Option<&[u8]> {
        self.start.as_deref()
    }

    /// Exclusive upper bound of the scan.
    pub fn stop(&self) -> Option<&[u8]> {
        self.stop.as_deref()
    }

    fn position(&mut self, start: Option<Vec<u8>>) {
        self.current = Vec::new().into_iter();
        self.done = false;

        self.next_block = match start.as_deref() {
            Some(key) => self
                .file
                .find_block_for_key(key)
                .unwrap_or(self.file.block_count()),
            None => 0,
        };

        if let (Some(start), Some(stop)) = (start.as_deref(), self.stop.as_deref()) {
            if start >= stop {
                self.done = true;
            }
        }
        self.start = start;
    }

    /// `true` if every key of block `idx` is at or past `stop`.
    ///
    /// Block `idx` only holds keys greater than the last key of block
    /// `idx - 1`, so the check needs no I/O.
    fn block_past_stop(&self, idx: usize) -> bool {
        let Some(stop) = self.stop.as_deref() else {
            return false;
        };
        match idx.checked_sub(1) {
            Some(prev) => stop <= self.file.block_metas()[prev].last_key().key(),
            None => false,
        }
    }

    /// Loads the next block into `current`. Returns `false` when there is
    /// no further block inside the range.
    fn load_next_block(&mut self) -> Result<bool, DiskFileError> {
        if self.next_block >= self.file.block_count() || self.block_past_stop(self.next_block) {
            return Ok(false);
        }

        let records = self.file.read_block(self.next_block)?;
        self.next_block += 1;
        self.current = records.into_iter();
        Ok(true)
    }
}

impl<S: Deref<Target = DiskFile>> Iterator for ScanIterator<S> {
    type Item = Result<KeyValue, DiskFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if let Some(kv) = self.current.next() {
                if self.start.as_deref().is_some_and(|start| kv.key() < start) {
                    continue;
                }
                if self.stop.as_deref().is_some_and(|stop| kv.key() >= stop) {
                    self.done = true;
                    return None;
                }
                return Some(Ok(kv));
            }

            match self.load_next_block() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    tracing::warn!(block = self.next_block, error = %e, "scan aborted");
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<S: Deref<Target = DiskFile>> std::iter::FusedIterator for ScanIterator<S> {}
