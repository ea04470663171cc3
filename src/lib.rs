// src/lib.rs
//
// Crate root: module tree and public re-exports.

//! Indexed record loading for training pipelines.
//!
//! Records live in TFRecord-framed container files and are located through an
//! [`Index`]. An [`IndexedFileLoader`] walks the index in sequential or
//! per-epoch shuffled order, a [`TfExampleParser`] decodes each payload into
//! named tensors, and a [`PrefetchingReader`] runs both on a pool of worker
//! threads while handing batches to the caller in loader order.
//!
//! ```no_run
//! use recdlio::{FeatureSpec, FieldSpec, DType, IndexSource, ReaderOptions};
//!
//! # fn demo() -> recdlio::Result<()> {
//! let source = IndexSource::Scan {
//!     containers: vec!["train-000.tfrecord".into()],
//!     verify_checksums: false,
//! };
//! let spec = FeatureSpec::new(vec![
//!     FieldSpec::bytes("image"),
//!     FieldSpec::int64("label"),
//!     FieldSpec::fixed("bbox", DType::Float32, vec![4]),
//! ])?;
//! let opts = ReaderOptions::default().shuffle(true, 7).worker_count(4);
//!
//! let reader = recdlio::open_tfrecord_reader(&source, spec, &opts)?;
//! reader.start()?;
//! loop {
//!     let batch = reader.next_batch(32)?;
//!     // train on batch.samples ...
//!     if batch.epoch_boundary {
//!         break;
//!     }
//! }
//! reader.stop()?;
//! # Ok(()) }
//! ```

pub mod constants;
pub mod container;
pub mod error;
pub mod index;
pub mod loader;
pub mod options;
pub mod parser;
pub mod reader;
pub mod sampler;

pub use container::{build_container, ContainerWithIndex, RecordWriter, WrittenRecord};
pub use error::{ParseError, ReaderError, Result};
pub use index::{Index, IndexEntry, IndexFormat, IndexSource, RecordSpan};
pub use loader::{Fetched, IndexedFileLoader, RawRecord, RecordSource};
pub use options::ReaderOptions;
pub use parser::{
    CpuBackend, DType, FeatureSpec, FeatureValue, FieldSpec, HostTensor, RecordParser, Sample,
    Shape, TensorBackend, TfExampleParser,
};
pub use reader::{Batch, BatchStream, PrefetchingReader, ReaderState, ReaderStats};

/// Reader over indexed TFRecord containers decoding tf.train.Example records.
pub type TfRecordReader = PrefetchingReader<IndexedFileLoader, TfExampleParser>;

/// Build the index, loader and parser for `source` and wrap them in an idle reader.
pub fn open_tfrecord_reader(
    source: &IndexSource,
    spec: FeatureSpec,
    opts: &ReaderOptions,
) -> Result<TfRecordReader> {
    let index = Index::build(source)?;
    let loader = IndexedFileLoader::new(index, opts)?;
    PrefetchingReader::new(loader, TfExampleParser::new(spec), opts)
}
