// tests/common/mod.rs
//
// Shared fixtures for the integration tests: containers of tf.Example records
// written into a temporary directory.

#![allow(dead_code)]

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use recdlio::parser::ExampleBuilder;
use recdlio::{
    Batch, DType, FeatureSpec, FieldSpec, Fetched, HostTensor, RawRecord, RecordSource,
    RecordWriter, Sample, WrittenRecord,
};
use tempfile::TempDir;

/// Containers written to a temp dir, plus where each record landed.
pub struct Fixture {
    pub dir: TempDir,
    pub containers: Vec<PathBuf>,
    pub records: Vec<Vec<WrittenRecord>>,
}

impl Fixture {
    pub fn total(&self) -> usize {
        self.records.iter().map(Vec::len).sum()
    }
}

/// Record with global id `i`: `id` int64, `name` bytes, `score` float32,
/// `xy` two float32s.
pub fn example(i: usize) -> Vec<u8> {
    ExampleBuilder::new()
        .int64("id", &[i as i64])
        .bytes("name", [format!("rec-{}", i)])
        .float32("score", &[i as f32 * 0.5])
        .float32("xy", &[i as f32, -(i as f32)])
        .build()
}

pub fn spec() -> FeatureSpec {
    FeatureSpec::new(vec![
        FieldSpec::int64("id"),
        FieldSpec::bytes("name"),
        FieldSpec::float32("score"),
        FieldSpec::fixed("xy", DType::Float32, vec![2]),
    ])
    .expect("valid spec")
}

/// One container per entry of `counts`; ids continue across files.
pub fn write_containers(counts: &[usize]) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let mut containers = Vec::new();
    let mut records = Vec::new();
    let mut next = 0usize;

    for (n, &count) in counts.iter().enumerate() {
        let path = dir.path().join(format!("part-{:03}.tfrecord", n));
        let mut writer = RecordWriter::new(BufWriter::new(File::create(&path).unwrap()));
        for _ in 0..count {
            writer.write_record(&example(next)).unwrap();
            next += 1;
        }
        let (_, written) = writer.finish().unwrap();
        containers.push(path);
        records.push(written);
    }

    Fixture { dir, containers, records }
}

/// Invert the byte at `pos` of a container file.
pub fn corrupt_at(path: &Path, pos: u64) {
    let mut f = OpenOptions::new().read(true).write(true).open(path).unwrap();
    f.seek(SeekFrom::Start(pos)).unwrap();
    let mut b = [0u8; 1];
    f.read_exact(&mut b).unwrap();
    f.seek(SeekFrom::Start(pos)).unwrap();
    f.write_all(&[b[0] ^ 0xff]).unwrap();
}

/// Flip one byte inside the payload of a record so its data checksum fails.
pub fn corrupt_payload(path: &Path, rec: WrittenRecord) {
    corrupt_at(path, rec.offset + 12 + 2);
}

/// Endless source that sleeps before every record, to hold a consumer in
/// `next_batch`. Record `i` is `example(i)`.
pub struct StallingSource {
    delay: Duration,
    pos: usize,
}

impl StallingSource {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pos: 0 }
    }
}

impl RecordSource for StallingSource {
    fn next_record(&mut self) -> recdlio::Result<Fetched> {
        thread::sleep(self.delay);
        self.pos += 1;
        Ok(Fetched::Record(RawRecord::new(self.pos - 1, example(self.pos - 1))))
    }

    fn remaining_in_epoch(&self) -> usize {
        usize::MAX
    }

    fn epoch_len(&self) -> usize {
        usize::MAX
    }
}

pub fn id_of(sample: &Sample) -> i64 {
    match sample.get("id") {
        Some(HostTensor::Int64(a)) => *a.iter().next().expect("id value"),
        other => panic!("bad id field: {:?}", other),
    }
}

pub fn ids(batch: &Batch<Sample>) -> Vec<i64> {
    batch.samples.iter().map(id_of).collect()
}
