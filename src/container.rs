// src/container.rs
//
// Record framing for container files:
//
//   u64 length | u32 masked_crc32c(length bytes) | data[length] | u32 masked_crc32c(data)
//
// All integers little-endian. This is the TFRecord layout: the length checksum
// sits right after the length, before the payload, so TFRecord files written
// by other tools are read as-is.

use bytes::Bytes;
use std::io::{Cursor, Write};

use crate::constants::{
    CRC_MASK_DELTA, RECORD_CRC_SIZE, RECORD_FRAMING_SIZE, RECORD_LENGTH_SIZE,
};

/* ---------- low‑level helpers ---------- */
pub fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(CRC_MASK_DELTA)
}

/// Masked CRC-32C of `data`.
pub fn masked_crc32c(data: &[u8]) -> u32 {
    mask_crc(crc32c::crc32c(data))
}

fn write_raw_record<W: Write>(w: &mut W, data: &[u8]) -> std::io::Result<usize> {
    let len_buf = (data.len() as u64).to_le_bytes();
    w.write_all(&len_buf)?;
    w.write_all(&masked_crc32c(&len_buf).to_le_bytes())?;
    w.write_all(data)?;
    w.write_all(&masked_crc32c(data).to_le_bytes())?;
    Ok(RECORD_FRAMING_SIZE + data.len())
}
/* --------------------------------------- */

/// Why a framed record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the framing itself needs.
    Truncated { have: usize },
    /// Header length disagrees with the number of bytes that were read.
    LengthMismatch { header: u64, available: usize },
    LengthChecksum { stored: u32, computed: u32 },
    DataChecksum { stored: u32, computed: u32 },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Truncated { have } => {
                write!(f, "frame truncated: {} bytes, need at least {}", have, RECORD_FRAMING_SIZE)
            }
            FrameError::LengthMismatch { header, available } => {
                write!(f, "header length {} does not match {} payload bytes", header, available)
            }
            FrameError::LengthChecksum { stored, computed } => {
                write!(f, "length checksum mismatch: stored {:08x}, computed {:08x}", stored, computed)
            }
            FrameError::DataChecksum { stored, computed } => {
                write!(f, "data checksum mismatch: stored {:08x}, computed {:08x}", stored, computed)
            }
        }
    }
}

impl FrameError {
    pub fn is_checksum(&self) -> bool {
        matches!(self, FrameError::LengthChecksum { .. } | FrameError::DataChecksum { .. })
    }
}

/// Read the `u64` length header at the start of `buf`.
pub(crate) fn read_length(buf: &[u8]) -> Option<u64> {
    let head: [u8; RECORD_LENGTH_SIZE] = buf.get(..RECORD_LENGTH_SIZE)?.try_into().ok()?;
    Some(u64::from_le_bytes(head))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; RECORD_CRC_SIZE];
    b.copy_from_slice(&buf[at..at + RECORD_CRC_SIZE]);
    u32::from_le_bytes(b)
}

/// Check the length checksum of a header (`length` + its crc, 12 bytes).
pub(crate) fn verify_header(header: &[u8]) -> Result<u64, FrameError> {
    if header.len() < RECORD_LENGTH_SIZE + RECORD_CRC_SIZE {
        return Err(FrameError::Truncated { have: header.len() });
    }
    let length = read_length(header).ok_or(FrameError::Truncated { have: header.len() })?;
    let stored = read_u32(header, RECORD_LENGTH_SIZE);
    let computed = masked_crc32c(&header[..RECORD_LENGTH_SIZE]);
    if stored != computed {
        return Err(FrameError::LengthChecksum { stored, computed });
    }
    Ok(length)
}

/// Validate one complete framed record and return its payload slice.
///
/// The header length must account for every byte in `frame`; both checksums
/// are recomputed and compared.
pub fn decode_frame(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < RECORD_FRAMING_SIZE {
        return Err(FrameError::Truncated { have: frame.len() });
    }
    let available = frame.len() - RECORD_FRAMING_SIZE;
    let length = verify_header(frame)?;
    if length != available as u64 {
        return Err(FrameError::LengthMismatch { header: length, available });
    }

    let data_start = RECORD_LENGTH_SIZE + RECORD_CRC_SIZE;
    let data = &frame[data_start..data_start + available];
    let stored = read_u32(frame, data_start + available);
    let computed = masked_crc32c(data);
    if stored != computed {
        return Err(FrameError::DataChecksum { stored, computed });
    }
    Ok(data)
}

/// Location of one framed record inside a container, as written by [`RecordWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenRecord {
    pub offset: u64,
    pub length: u64,
}

/// Streams framed records into any writer while remembering where each one landed.
pub struct RecordWriter<W: Write> {
    inner: W,
    offset: u64,
    written: Vec<WrittenRecord>,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, offset: 0, written: Vec::new() }
    }

    /// Frame and append one payload.
    pub fn write_record(&mut self, payload: &[u8]) -> std::io::Result<WrittenRecord> {
        let length = write_raw_record(&mut self.inner, payload)? as u64;
        let rec = WrittenRecord { offset: self.offset, length };
        self.offset += length;
        self.written.push(rec);
        Ok(rec)
    }

    pub fn entries(&self) -> &[WrittenRecord] {
        &self.written
    }

    /// Flush and hand back the writer together with the record locations.
    pub fn finish(mut self) -> std::io::Result<(W, Vec<WrittenRecord>)> {
        self.inner.flush()?;
        Ok((self.inner, self.written))
    }
}

/// Container stream plus matching 16‑byte‑per‑record binary index.
pub struct ContainerWithIndex {
    pub data:  Bytes,
    pub index: Bytes,
}

/// Build both the record stream *and* its binary index in memory.
pub fn build_container<I, P>(payloads: I) -> std::io::Result<ContainerWithIndex>
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut writer = RecordWriter::new(Cursor::new(Vec::<u8>::new()));
    for payload in payloads {
        writer.write_record(payload.as_ref())?;
    }
    let (cursor, entries) = writer.finish()?;

    let mut idx_buf = Cursor::new(Vec::<u8>::new());
    for e in &entries {
        idx_buf.write_all(&(e.offset as i64).to_le_bytes())?;
        idx_buf.write_all(&(e.length as i64).to_le_bytes())?;
    }

    Ok(ContainerWithIndex {
        data:  Bytes::from(cursor.into_inner()),
        index: Bytes::from(idx_buf.into_inner()),
    })
}
