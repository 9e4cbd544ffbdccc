//! Disk file writer — streams sorted records into a new file.
//!
//! [`DiskFileWriter`] is the single-owner write path. Records are appended in
//! strictly increasing key order; whenever the current block would grow past
//! the configured limit it is sealed, written at the current file offset and
//! registered in the block index. [`DiskFileWriter::finish`] seals the last
//! block and writes the index and trailer.
//!
//! # Failure handling
//!
//! Any I/O error moves the writer into a failed state. A failed writer never
//! writes a trailer, so whatever reached disk is rejected by
//! [`DiskFile::open`](super::DiskFile::open) with
//! [`DiskFileError::InvalidFormat`].
//!
//! An ordering violation is a caller error, not a write failure: the record is
//! rejected and the writer stays usable.

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    mem,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::DiskFileConfig;
use crate::encoding::Encode;
use crate::record::KeyValue;

use super::{BlockIndexWriter, BlockWriter, DiskFileError, TRAILER_SIZE, Trailer, block};

#[derive(Debug)]
enum WriterState {
    Open,
    Finished(Trailer),
    Failed,
}

/// Writes a new disk file sequentially.
///
/// # Example
///
/// ```rust,ignore
/// let mut writer = DiskFileWriter::create(&path, DiskFileConfig::default())?;
/// writer.append(KeyValue::put("a", "1"))?;
/// writer.append(KeyValue::delete("b"))?;
/// writer.finish()?;
/// ```
pub struct DiskFileWriter {
    path: PathBuf,
    config: DiskFileConfig,
    out: BufWriter<File>,

    /// Bytes handed to `out` so far; the offset of the next block.
    offset: u64,

    block: BlockWriter,
    index: BlockIndexWriter,

    /// Key of the last accepted record, across all blocks.
    last_key: Option<Vec<u8>>,

    record_count: u64,
    state: WriterState,
}

impl DiskFileWriter {
    /// Creates (or truncates) the file at `path` and returns a writer for it.
    ///
    /// # Errors
    ///
    /// - [`DiskFileError::InvalidConfig`] if `config` is rejected.
    /// - [`DiskFileError::Io`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, config: DiskFileConfig) -> Result<Self, DiskFileError> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        info!(
            path = %path.display(),
            block_size_limit = config.block_size_limit,
            "creating disk file"
        );

        Ok(Self {
            block: Self::new_block(&config),
            path,
            config,
            out: BufWriter::new(file),
            offset: 0,
            index: BlockIndexWriter::new(),
            last_key: None,
            record_count: 0,
            state: WriterState::Open,
        })
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// - [`DiskFileError::SealedWriter`] if the writer was finished.
    /// - [`DiskFileError::Internal`] if an earlier write failed.
    /// - [`DiskFileError::RecordTooLarge`] if the key or value is longer
    ///   than [`MAX_BYTE_LEN`](crate::encoding::MAX_BYTE_LEN). The writer
    ///   stays usable.
    /// - [`DiskFileError::OrderingViolation`] if the key does not sort
    ///   strictly after the previous one. The writer stays usable.
    /// - [`DiskFileError::Io`] if writing a completed block fails.
    pub fn append(&mut self, kv: KeyValue) -> Result<(), DiskFileError> {
        self.ensure_open()?;
        block::check_record_size(&kv)?;

        if let Some(last) = &self.last_key {
            if kv.key() <= last.as_slice() {
                return Err(DiskFileError::OrderingViolation {
                    previous: last.clone(),
                    offending: kv.key().to_vec(),
                });
            }
        }

        if self.block.would_overflow(&kv, self.config.block_size_limit) {
            self.guard(Self::flush_block)?;
        }

        let key = kv.key().to_vec();
        self.block.append(kv)?;
        self.last_key = Some(key);
        self.record_count += 1;
        Ok(())
    }

    /// Seals the last block, writes the block index and trailer and syncs the
    /// file to disk.
    ///
    /// A file with no records is valid: it holds an empty index and a
    /// trailer with a block count of zero.
    ///
    /// # Errors
    ///
    /// - [`DiskFileError::SealedWriter`] if already finished.
    /// - [`DiskFileError::Internal`] if an earlier write failed.
    /// - [`DiskFileError::Io`] on write or sync failure.
    pub fn finish(&mut self) -> Result<Trailer, DiskFileError> {
        self.ensure_open()?;
        let trailer = self.guard(Self::write_tail)?;
        self.state = WriterState::Finished(trailer);

        info!(
            path = %self.path.display(),
            records = self.record_count,
            blocks = trailer.block_count,
            file_size = trailer.file_size,
            "finished disk file"
        );
        Ok(trailer)
    }

    /// Finishes the file if that has not happened yet.
    ///
    /// Calling `close` on a finished or failed writer does nothing.
    pub fn close(&mut self) -> Result<(), DiskFileError> {
        match self.state {
            WriterState::Open => self.finish().map(|_| ()),
            WriterState::Finished(_) | WriterState::Failed => Ok(()),
        }
    }

    /// Trailer of the finished file, once [`finish`](Self::finish) succeeded.
    pub fn trailer(&self) -> Option<&Trailer> {
        match &self.state {
            WriterState::Finished(trailer) => Some(trailer),
            _ => None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records accepted so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Number of blocks written so far (the open block is not counted).
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn new_block(config: &DiskFileConfig) -> BlockWriter {
        BlockWriter::new(config.bloom_hash_count, config.bloom_bits_per_key)
    }

    fn ensure_open(&self) -> Result<(), DiskFileError> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Finished(_) => Err(DiskFileError::SealedWriter),
            WriterState::Failed => Err(DiskFileError::Internal(
                "writer failed earlier and cannot be used".into(),
            )),
        }
    }

    /// Runs a write step, moving the writer into the failed state if it
    /// errors.
    fn guard<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> Result<T, DiskFileError>,
    ) -> Result<T, DiskFileError> {
        step(self).inspect_err(|e| {
            warn!(path = %self.path.display(), error = %e, "disk file write failed");
            self.state = WriterState::Failed;
        })
    }

    /// Seals the current block, writes it and records it in the index.
    fn flush_block(&mut self) -> Result<(), DiskFileError> {
        let fresh = Self::new_block(&self.config);
        let sealed = mem::replace(&mut self.block, fresh).seal()?;

        let size = sealed.bytes.len() as u64;
        self.out.write_all(&sealed.bytes)?;

        debug!(
            block = self.index.len(),
            offset = self.offset,
            size,
            records = sealed.record_count,
            "wrote data block"
        );

        self.index.append_meta(sealed.into_meta(self.offset))?;
        self.offset += size;
        Ok(())
    }

    fn write_tail(&mut self) -> Result<Trailer, DiskFileError> {
        if !self.block.is_empty() {
            self.flush_block()?;
        }

        let index_bytes = self.index.serialize()?;
        let block_index_offset = self.offset;
        let block_index_size = index_bytes.len() as u64;
        self.out.write_all(&index_bytes)?;
        self.offset += block_index_size;

        let trailer = Trailer {
            magic: self.config.magic,
            block_count: crate::encoding::len_to_u32(self.index.len())?,
            block_index_offset,
            block_index_size,
            file_size: self.offset + TRAILER_SIZE as u64,
        };
        let mut trailer_bytes = Vec::with_capacity(TRAILER_SIZE);
        trailer.encode_to(&mut trailer_bytes)?;
        self.out.write_all(&trailer_bytes)?;
        self.offset += TRAILER_SIZE as u64;

        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(trailer)
    }
}

impl std::fmt::Debug for DiskFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFileWriter")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("records", &self.record_count)
            .field("state", &self.state)
            .finish()
    }
}
