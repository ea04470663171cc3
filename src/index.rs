// src/index.rs
//
// Record index for container files.
//
// An index is the ordered table of (file, offset, length) triples locating every
// framed record. It is either read from precomputed index files or derived by
// scanning the containers once. Two on-disk index layouts are supported:
//
// - Binary: `{i64 offset, i64 length}` little-endian pairs, no header.
// - Text:   `"{offset} {size}\n"` lines, as produced by common TFRecord tooling.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::constants::{
    BINARY_INDEX_ENTRY_SIZE, RECORD_CRC_SIZE, RECORD_FRAMING_SIZE, RECORD_LENGTH_SIZE,
};
use crate::container::{masked_crc32c, read_length, verify_header};
use crate::error::{ReaderError, Result};

/// Where one framed record lives inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpan {
    /// Byte offset from start of file
    pub offset: u64,
    /// Total size in bytes (length + crc + data + crc)
    pub size: u64,
}

/// One record of the global index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub file_id: usize,
    pub byte_offset: u64,
    pub byte_length: u64,
}

/// On-disk layout of an index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexFormat {
    #[default]
    Binary,
    Text,
}

/// How to obtain the index for a set of containers.
#[derive(Debug, Clone)]
pub enum IndexSource {
    /// Derive the index by walking every container sequentially.
    Scan {
        containers: Vec<PathBuf>,
        /// Reject records whose checksums do not match while scanning.
        verify_checksums: bool,
    },
    /// One precomputed index file per container, paired by position.
    Files {
        containers: Vec<PathBuf>,
        index_files: Vec<PathBuf>,
        format: IndexFormat,
    },
}

/// Immutable, ordered record table shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct Index {
    entries: Vec<IndexEntry>,
    files: Vec<PathBuf>,
}

impl Index {
    /// Build the index from `source` and validate every range against its file size.
    pub fn build(source: &IndexSource) -> Result<Arc<Index>> {
        let (containers, spans) = match source {
            IndexSource::Scan { containers, verify_checksums } => {
                let mut spans = Vec::with_capacity(containers.len());
                for path in containers {
                    let file = File::open(path).map_err(|e| ReaderError::io(path, e))?;
                    let found = ContainerScanner::new(BufReader::new(file), path)
                        .verify_checksums(*verify_checksums)
                        .scan()?;
                    debug!("scanned {}: {} records", path.display(), found.len());
                    spans.push(found);
                }
                (containers, spans)
            }
            IndexSource::Files { containers, index_files, format } => {
                if containers.len() != index_files.len() {
                    return Err(ReaderError::InvalidConfig(format!(
                        "{} containers but {} index files",
                        containers.len(),
                        index_files.len()
                    )));
                }
                let spans = index_files
                    .iter()
                    .map(|p| read_index_file(p, *format))
                    .collect::<Result<Vec<_>>>()?;
                (containers, spans)
            }
        };

        let index = Index::from_spans(containers.clone(), spans)?;
        info!(
            "index built: {} records across {} file(s)",
            index.len(),
            index.files.len()
        );
        Ok(Arc::new(index))
    }

    /// Assemble an index from per-file spans, checking every span lies inside its file.
    pub fn from_spans(files: Vec<PathBuf>, spans: Vec<Vec<RecordSpan>>) -> Result<Index> {
        if files.len() != spans.len() {
            return Err(ReaderError::InvalidConfig(format!(
                "{} files but {} span lists",
                files.len(),
                spans.len()
            )));
        }

        let mut entries = Vec::with_capacity(spans.iter().map(Vec::len).sum());
        for (file_id, (path, file_spans)) in files.iter().zip(spans).enumerate() {
            let file_size = std::fs::metadata(path)
                .map_err(|e| ReaderError::io(path, e))?
                .len();
            for (i, span) in file_spans.into_iter().enumerate() {
                if span.size < RECORD_FRAMING_SIZE as u64 {
                    return Err(ReaderError::format(
                        path,
                        format!("entry {}: length {} is shorter than record framing", i, span.size),
                    ));
                }
                let end = span.offset.checked_add(span.size).ok_or_else(|| {
                    ReaderError::format(path, format!("entry {}: range overflows", i))
                })?;
                if end > file_size {
                    return Err(ReaderError::format(
                        path,
                        format!(
                            "entry {}: range {}..{} exceeds file size {}",
                            i, span.offset, end, file_size
                        ),
                    ));
                }
                entries.push(IndexEntry {
                    file_id,
                    byte_offset: span.offset,
                    byte_length: span.size,
                });
            }
        }

        Ok(Index { entries, files })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn entry(&self, i: usize) -> Option<&IndexEntry> {
        self.entries.get(i)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file_path(&self, file_id: usize) -> Option<&Path> {
        self.files.get(file_id).map(PathBuf::as_path)
    }
}

/// Sequential walker over a container stream that recovers record boundaries.
///
/// Without checksum verification only the length headers are read and the
/// payloads are skipped with seeks.
pub struct ContainerScanner<'p, R: Read + Seek> {
    reader: R,
    path: &'p Path,
    verify: bool,
}

impl<'p, R: Read + Seek> ContainerScanner<'p, R> {
    /// `path` is only used to label errors.
    pub fn new(reader: R, path: &'p Path) -> Self {
        Self { reader, path, verify: false }
    }

    pub fn verify_checksums(mut self, on: bool) -> Self {
        self.verify = on;
        self
    }

    pub fn scan(&mut self) -> Result<Vec<RecordSpan>> {
        let path = self.path;
        let io = |e| ReaderError::io(path, e);

        let file_size = self.reader.seek(SeekFrom::End(0)).map_err(io)?;
        self.reader.seek(SeekFrom::Start(0)).map_err(io)?;

        let mut spans = Vec::new();
        let mut payload = Vec::new();
        let mut pos = 0u64;
        let header_size = (RECORD_LENGTH_SIZE + RECORD_CRC_SIZE) as u64;

        while pos < file_size {
            if pos + header_size > file_size {
                return Err(ReaderError::format(
                    path,
                    format!("truncated record header at offset {}", pos),
                ));
            }

            let mut header = [0u8; RECORD_LENGTH_SIZE + RECORD_CRC_SIZE];
            self.reader.read_exact(&mut header).map_err(io)?;
            let length = if self.verify {
                verify_header(&header)
                    .map_err(|e| ReaderError::format(path, format!("record at offset {}: {}", pos, e)))?
            } else {
                read_length(&header).unwrap_or(0)
            };

            let remaining = file_size - pos - header_size;
            if length.saturating_add(RECORD_CRC_SIZE as u64) > remaining {
                return Err(ReaderError::format(
                    path,
                    format!(
                        "truncated record at offset {}: expected {} bytes, only {} remaining",
                        pos, length, remaining
                    ),
                ));
            }

            if self.verify {
                payload.resize(length as usize, 0);
                self.reader.read_exact(&mut payload).map_err(io)?;
                let mut crc = [0u8; RECORD_CRC_SIZE];
                self.reader.read_exact(&mut crc).map_err(io)?;
                let stored = u32::from_le_bytes(crc);
                let computed = masked_crc32c(&payload);
                if stored != computed {
                    return Err(ReaderError::format(
                        path,
                        format!(
                            "record at offset {}: data checksum mismatch: stored {:08x}, computed {:08x}",
                            pos, stored, computed
                        ),
                    ));
                }
            } else {
                self.reader
                    .seek(SeekFrom::Current((length + RECORD_CRC_SIZE as u64) as i64))
                    .map_err(io)?;
            }

            let size = header_size + length + RECORD_CRC_SIZE as u64;
            spans.push(RecordSpan { offset: pos, size });
            pos += size;
        }

        Ok(spans)
    }
}

/// Read an index file in the given layout.
pub fn read_index_file<P: AsRef<Path>>(index_path: P, format: IndexFormat) -> Result<Vec<RecordSpan>> {
    match format {
        IndexFormat::Binary => read_binary_index(index_path),
        IndexFormat::Text => read_text_index(index_path),
    }
}

/// Parse a binary index: packed `{i64 offset, i64 length}` pairs.
pub fn read_binary_index<P: AsRef<Path>>(index_path: P) -> Result<Vec<RecordSpan>> {
    let path = index_path.as_ref();
    let data = std::fs::read(path).map_err(|e| ReaderError::io(path, e))?;
    if data.len() % BINARY_INDEX_ENTRY_SIZE != 0 {
        return Err(ReaderError::format(
            path,
            format!(
                "size {} is not a multiple of {}",
                data.len(),
                BINARY_INDEX_ENTRY_SIZE
            ),
        ));
    }

    data.chunks_exact(BINARY_INDEX_ENTRY_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let mut offset = [0u8; 8];
            let mut length = [0u8; 8];
            offset.copy_from_slice(&chunk[..8]);
            length.copy_from_slice(&chunk[8..]);
            let offset = i64::from_le_bytes(offset);
            let size = i64::from_le_bytes(length);
            if offset < 0 || size < 0 {
                return Err(ReaderError::format(
                    path,
                    format!("entry {}: negative offset {} or length {}", i, offset, size),
                ));
            }
            Ok(RecordSpan { offset: offset as u64, size: size as u64 })
        })
        .collect()
}

/// Parse a text index: `"offset size"` per line, blank lines skipped.
pub fn read_text_index<P: AsRef<Path>>(index_path: P) -> Result<Vec<RecordSpan>> {
    let path = index_path.as_ref();
    let file = File::open(path).map_err(|e| ReaderError::io(path, e))?;

    let mut entries = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ReaderError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 2 {
            return Err(ReaderError::format(
                path,
                format!("line {}: expected 'offset size', got '{}'", line_num + 1, line),
            ));
        }
        let field = |s: &str, what: &str| {
            s.parse::<u64>().map_err(|e| {
                ReaderError::format(path, format!("line {}: invalid {}: {}", line_num + 1, what, e))
            })
        };
        entries.push(RecordSpan {
            offset: field(parts[0], "offset")?,
            size: field(parts[1], "size")?,
        });
    }

    Ok(entries)
}

/// Write `spans` to `index_path` in the given layout.
pub fn write_index<P: AsRef<Path>>(spans: &[RecordSpan], index_path: P, format: IndexFormat) -> Result<()> {
    let path = index_path.as_ref();
    let io = |e| ReaderError::io(path, e);
    let mut writer = BufWriter::new(File::create(path).map_err(io)?);

    for s in spans {
        match format {
            IndexFormat::Binary => {
                writer.write_all(&(s.offset as i64).to_le_bytes()).map_err(io)?;
                writer.write_all(&(s.size as i64).to_le_bytes()).map_err(io)?;
            }
            IndexFormat::Text => writeln!(writer, "{} {}", s.offset, s.size).map_err(io)?,
        }
    }
    writer.flush().map_err(io)
}

/// Scan a container and write its index file. Returns the number of records indexed.
pub fn write_index_for_container<P: AsRef<Path>, Q: AsRef<Path>>(
    container: P,
    index_path: Q,
    format: IndexFormat,
    verify_checksums: bool,
) -> Result<usize> {
    let container = container.as_ref();
    let file = File::open(container).map_err(|e| ReaderError::io(container, e))?;
    let spans = ContainerScanner::new(BufReader::new(file), container)
        .verify_checksums(verify_checksums)
        .scan()?;
    write_index(&spans, index_path, format)?;
    Ok(spans.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::build_container;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn scan_bytes(data: &[u8], verify: bool) -> Result<Vec<RecordSpan>> {
        ContainerScanner::new(Cursor::new(data), Path::new("mem"))
            .verify_checksums(verify)
            .scan()
    }

    #[test]
    fn scan_multiple_records() {
        let built = build_container([&b"first"[..], &b"second"[..], &b"third"[..]]).unwrap();
        let spans = scan_bytes(&built.data, true).expect("scan");

        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].offset, 0);
        assert_eq!(spans[1].offset, (RECORD_FRAMING_SIZE + 5) as u64);
        assert_eq!(spans[2].offset, (2 * RECORD_FRAMING_SIZE + 11) as u64);
        assert_eq!(spans[2].size, (RECORD_FRAMING_SIZE + 5) as u64);
    }

    #[test]
    fn scan_empty_container() {
        assert!(scan_bytes(&[], true).unwrap().is_empty());
    }

    #[test]
    fn scan_truncated_payload_is_format_error() {
        let built = build_container([b"test".as_slice()]).unwrap();
        let truncated = &built.data[..built.data.len() - 5];
        assert!(matches!(scan_bytes(truncated, false), Err(ReaderError::Format { .. })));
    }

    #[test]
    fn scan_partial_header_is_format_error() {
        let mut data = build_container([b"ok".as_slice()]).unwrap().data.to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(scan_bytes(&data, false), Err(ReaderError::Format { .. })));
    }

    #[test]
    fn scan_checksum_only_checked_when_verifying() {
        let mut data = build_container([b"abcdef".as_slice()]).unwrap().data.to_vec();
        data[14] ^= 0x01;
        assert_eq!(scan_bytes(&data, false).unwrap().len(), 1);
        assert!(matches!(scan_bytes(&data, true), Err(ReaderError::Format { .. })));
    }

    #[test]
    fn binary_index_roundtrip_through_build() {
        let dir = tempdir().unwrap();
        let built = build_container([&b"a"[..], &b"bb"[..], &b"ccc"[..]]).unwrap();
        let data_path = dir.path().join("train.rec");
        let idx_path = dir.path().join("train.idx");
        std::fs::write(&data_path, &built.data).unwrap();
        std::fs::write(&idx_path, &built.index).unwrap();

        let index = Index::build(&IndexSource::Files {
            containers: vec![data_path.clone()],
            index_files: vec![idx_path],
            format: IndexFormat::Binary,
        })
        .unwrap();

        let scanned = Index::build(&IndexSource::Scan {
            containers: vec![data_path],
            verify_checksums: true,
        })
        .unwrap();
        assert_eq!(index.entries(), scanned.entries());
        assert_eq!(index.entry(2).unwrap().byte_length, (RECORD_FRAMING_SIZE + 3) as u64);
    }

    #[test]
    fn binary_index_with_ragged_size_is_rejected() {
        let dir = tempdir().unwrap();
        let idx = dir.path().join("bad.idx");
        std::fs::write(&idx, [0u8; 20]).unwrap();
        assert!(matches!(read_binary_index(&idx), Err(ReaderError::Format { .. })));
    }

    #[test]
    fn negative_binary_entry_is_rejected() {
        let dir = tempdir().unwrap();
        let idx = dir.path().join("neg.idx");
        let mut bytes = (-1i64).to_le_bytes().to_vec();
        bytes.extend_from_slice(&20i64.to_le_bytes());
        std::fs::write(&idx, bytes).unwrap();
        assert!(matches!(read_binary_index(&idx), Err(ReaderError::Format { .. })));
    }

    #[test]
    fn text_index_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let idx = dir.path().join("t.idx");
        std::fs::write(&idx, "0 100\n\n150 75\n\n\n300 200\n").unwrap();
        let spans = read_text_index(&idx).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[1], RecordSpan { offset: 150, size: 75 });
    }

    #[test]
    fn text_index_invalid_line() {
        let dir = tempdir().unwrap();
        let idx = dir.path().join("t.idx");
        std::fs::write(&idx, "0 100\ninvalid line\n").unwrap();
        assert!(matches!(read_text_index(&idx), Err(ReaderError::Format { .. })));
    }

    #[test]
    fn out_of_range_entry_fails_build() {
        let dir = tempdir().unwrap();
        let built = build_container([b"x".as_slice()]).unwrap();
        let data_path = dir.path().join("d.rec");
        std::fs::write(&data_path, &built.data).unwrap();

        let too_long = RecordSpan { offset: 0, size: built.data.len() as u64 + 1 };
        let err = Index::from_spans(vec![data_path], vec![vec![too_long]]).unwrap_err();
        assert!(matches!(err, ReaderError::Format { .. }));
    }

    #[test]
    fn text_writer_matches_scan() {
        let dir = tempdir().unwrap();
        let built = build_container([&b"first"[..], &b"second"[..]]).unwrap();
        let data_path = dir.path().join("d.rec");
        let idx_path = dir.path().join("d.idx");
        std::fs::write(&data_path, &built.data).unwrap();

        let n = write_index_for_container(&data_path, &idx_path, IndexFormat::Text, true).unwrap();
        assert_eq!(n, 2);
        let text = std::fs::read_to_string(&idx_path).unwrap();
        assert!(text.starts_with("0 "));
        assert_eq!(read_text_index(&idx_path).unwrap(), scan_bytes(&built.data, true).unwrap());
    }
}
