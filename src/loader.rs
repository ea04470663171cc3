// src/loader.rs
//
// Index-driven record loader: walks the index in sequential or per-epoch
// shuffled order, reads each framed record with a positioned read, validates
// and strips the framing, and hands out owned payload buffers.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::constants::{RECORD_CRC_SIZE, RECORD_LENGTH_SIZE};
use crate::container::decode_frame;
use crate::error::{ReaderError, Result};
use crate::index::{Index, IndexEntry};
use crate::options::ReaderOptions;
use crate::sampler::{Sampler, SequentialSampler, ShuffleSampler};

/// Owned payload of one record, moved from the loader into the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Position of the record in the canonical index order.
    pub index: usize,
    data: Vec<u8>,
}

impl RawRecord {
    pub fn new(index: usize, data: Vec<u8>) -> Self {
        Self { index, data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Result of asking a source for its next record.
#[derive(Debug)]
pub enum Fetched {
    Record(RawRecord),
    /// The current order is exhausted; the next call starts a new epoch.
    EndOfEpoch,
}

/// Producer of raw records, driven by a single thread at a time.
pub trait RecordSource: Send + 'static {
    fn next_record(&mut self) -> Result<Fetched>;

    /// Records still to come before the next `EndOfEpoch`.
    fn remaining_in_epoch(&self) -> usize;

    /// Records per epoch.
    fn epoch_len(&self) -> usize;

    /// Records dropped because their framing did not validate.
    fn skipped(&self) -> u64 {
        0
    }
}

/// Position within the current epoch, the epoch counter and the visiting order.
pub struct EpochCursor {
    sampler: Box<dyn Sampler>,
    epoch: u64,
}

impl EpochCursor {
    pub fn new(len: usize, shuffle: bool, seed: u64) -> Self {
        let sampler: Box<dyn Sampler> = if shuffle {
            Box::new(ShuffleSampler::new(len, seed))
        } else {
            Box::new(SequentialSampler::new(len))
        };
        Self { sampler, epoch: 0 }
    }

    pub fn next_position(&mut self) -> Option<usize> {
        self.sampler.next_index()
    }

    pub fn remaining(&self) -> usize {
        self.sampler.remaining()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Close the current epoch and prepare the order for the next one.
    pub fn advance_epoch(&mut self) {
        self.epoch += 1;
        self.sampler.reset(self.epoch);
    }
}

/// Loads records of an [`Index`] from their container files.
pub struct IndexedFileLoader {
    index: Arc<Index>,
    /// Slice of the index owned by this shard.
    range: Range<usize>,
    cursor: EpochCursor,
    handles: Vec<Option<File>>,
    strict: bool,
    skipped: u64,
}

impl IndexedFileLoader {
    pub fn new(index: Arc<Index>, opts: &ReaderOptions) -> Result<Self> {
        opts.validate()?;
        let total = index.len();
        let range = (total * opts.shard_id / opts.num_shards)
            ..(total * (opts.shard_id + 1) / opts.num_shards);
        debug!(
            "loader shard {}/{}: records {:?} of {}",
            opts.shard_id, opts.num_shards, range, total
        );

        let cursor = EpochCursor::new(range.len(), opts.shuffle, opts.shuffle_seed);
        let handles = (0..index.files().len()).map(|_| None).collect();
        Ok(Self {
            index,
            range,
            cursor,
            handles,
            strict: opts.strict_checksums,
            skipped: 0,
        })
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    pub fn epoch(&self) -> u64 {
        self.cursor.epoch()
    }

    pub fn skipped_records(&self) -> u64 {
        self.skipped
    }

    fn file(&mut self, file_id: usize) -> Result<&mut File> {
        let path = self
            .index
            .file_path(file_id)
            .ok_or_else(|| ReaderError::InvalidConfig(format!("unknown file id {}", file_id)))?;
        let slot = &mut self.handles[file_id];
        let file = match slot.take() {
            Some(f) => slot.insert(f),
            None => {
                debug!("opening container {}", path.display());
                slot.insert(File::open(path).map_err(|e| ReaderError::io(path, e))?)
            }
        };
        Ok(file)
    }

    fn read_framed(&mut self, entry: IndexEntry) -> Result<Vec<u8>> {
        let path = self.index.file_path(entry.file_id).map(|p| p.to_path_buf()).unwrap_or_default();
        let file = self.file(entry.file_id)?;
        let mut buf = vec![0u8; entry.byte_length as usize];
        file.seek(SeekFrom::Start(entry.byte_offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| ReaderError::io(&path, e))?;
        Ok(buf)
    }

    /// Random access by canonical index position, bypassing the epoch order.
    ///
    /// Framing errors are always reported, whatever the strictness setting.
    pub fn read_record(&mut self, index: usize) -> Result<RawRecord> {
        let entry = *self.index.entry(index).ok_or_else(|| {
            ReaderError::InvalidConfig(format!(
                "record {} out of range for index of {}",
                index,
                self.index.len()
            ))
        })?;
        let mut framed = self.read_framed(entry)?;

        let payload_len = match decode_frame(&framed) {
            Ok(payload) => payload.len(),
            Err(e) => {
                let path = self.index.file_path(entry.file_id).unwrap_or_else(|| "".as_ref());
                return Err(ReaderError::format(
                    path,
                    format!("record {} at offset {}: {}", index, entry.byte_offset, e),
                ));
            }
        };

        // strip the header in place
        let start = RECORD_LENGTH_SIZE + RECORD_CRC_SIZE;
        framed.copy_within(start..start + payload_len, 0);
        framed.truncate(payload_len);
        Ok(RawRecord::new(index, framed))
    }
}

impl RecordSource for IndexedFileLoader {
    fn next_record(&mut self) -> Result<Fetched> {
        loop {
            let Some(pos) = self.cursor.next_position() else {
                debug!("epoch {} complete", self.cursor.epoch());
                self.cursor.advance_epoch();
                return Ok(Fetched::EndOfEpoch);
            };

            let index = self.range.start + pos;
            match self.read_record(index) {
                Ok(rec) => return Ok(Fetched::Record(rec)),
                Err(e @ ReaderError::Format { .. }) if !self.strict => {
                    self.skipped += 1;
                    warn!("skipping corrupt record: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn remaining_in_epoch(&self) -> usize {
        self.cursor.remaining()
    }

    fn epoch_len(&self) -> usize {
        self.range.len()
    }

    fn skipped(&self) -> u64 {
        self.skipped
    }
}
