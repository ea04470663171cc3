// tests/test_roundtrip.rs
//
// Encode -> frame -> load -> parse keeps bytes and numbers exact.

use bytes::Bytes;
use recdlio::parser::ExampleBuilder;
use recdlio::{
    build_container, DType, FeatureSpec, FieldSpec, HostTensor, Index, IndexSource,
    IndexedFileLoader, RecordParser, ReaderOptions, TfExampleParser,
};
use tempfile::tempdir;

#[test]
fn payload_bytes_and_floats_survive_the_full_path() {
    let blobs: Vec<Vec<u8>> = vec![vec![], vec![0u8], (0..=255u8).collect(), vec![0xff; 4096]];
    let floats = [0.0f32, -0.0, f32::MIN_POSITIVE, f32::MAX, f32::NAN, 1.0e-40];
    let payloads: Vec<Vec<u8>> = blobs
        .iter()
        .enumerate()
        .map(|(i, b)| {
            ExampleBuilder::new()
                .bytes("blob", [b.as_slice()])
                .int64("n", &[i64::MIN + i as i64, i64::MAX])
                .float32("f", &floats)
                .build()
        })
        .collect();

    let dir = tempdir().unwrap();
    let path = dir.path().join("rt.tfrecord");
    let built = build_container(&payloads).unwrap();
    std::fs::write(&path, &built.data).unwrap();

    // the in-memory binary index agrees with a scan
    let idx_path = dir.path().join("rt.idx");
    std::fs::write(&idx_path, &built.index).unwrap();
    let index = Index::build(&IndexSource::Files {
        containers: vec![path.clone()],
        index_files: vec![idx_path],
        format: Default::default(),
    })
    .unwrap();
    let scanned = Index::build(&IndexSource::Scan { containers: vec![path], verify_checksums: true }).unwrap();
    assert_eq!(index.entries(), scanned.entries());

    let parser = TfExampleParser::new(
        FeatureSpec::new(vec![
            FieldSpec::bytes("blob"),
            FieldSpec::fixed("n", DType::Int64, vec![2]),
            FieldSpec::var_len("f", DType::Float32),
        ])
        .unwrap(),
    );
    let mut loader = IndexedFileLoader::new(index, &ReaderOptions::default()).unwrap();

    for (i, blob) in blobs.iter().enumerate() {
        let raw = loader.read_record(i).unwrap();
        assert_eq!(raw.data(), payloads[i].as_slice());

        let sample = parser.parse(raw).unwrap();
        match sample.get("blob") {
            Some(HostTensor::Bytes(a)) => {
                assert_eq!(a.iter().next(), Some(&Bytes::copy_from_slice(blob)));
            }
            other => panic!("blob: {:?}", other),
        }
        let n: Vec<i64> = sample.get("n").unwrap().as_i64().unwrap().iter().copied().collect();
        assert_eq!(n, vec![i64::MIN + i as i64, i64::MAX]);

        let f: Vec<u32> = sample.get("f").unwrap().as_f32().unwrap().iter().map(|x| x.to_bits()).collect();
        let want: Vec<u32> = floats.iter().map(|x| x.to_bits()).collect();
        assert_eq!(f, want);
    }
}
