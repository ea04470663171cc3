// src/reader/stream.rs
//
// Async adapter: exposes a running reader as a `Stream` of batches for tokio
// callers. Each blocking `next_batch` runs on the blocking pool so the async
// executor is never parked on the reader's condition variables.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures_core::Stream;

use super::{Batch, PrefetchingReader};
use crate::error::{ReaderError, Result};
use crate::loader::RecordSource;
use crate::parser::RecordParser;

pub type BatchStream<T> = Pin<Box<dyn Stream<Item = Result<Batch<T>>> + Send + 'static>>;

impl<S: RecordSource, P: RecordParser> PrefetchingReader<S, P> {
    /// Stream batches of `batch_size` until the reader is stopped or drained.
    ///
    /// The reader must already be started. `Cancelled` ends the stream
    /// cleanly, after yielding any samples an interrupted call had gathered;
    /// any other error is yielded once and ends it too.
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use futures_util::StreamExt;
    /// # async fn demo(reader: Arc<recdlio::TfRecordReader>) -> recdlio::Result<()> {
    /// reader.start()?;
    /// let mut batches = reader.clone().into_stream(32);
    /// while let Some(batch) = batches.next().await {
    ///     let batch = batch?;
    ///     if batch.epoch_boundary {
    ///         reader.stop()?;
    ///     }
    /// }
    /// # Ok(()) }
    /// ```
    pub fn into_stream(self: Arc<Self>, batch_size: usize) -> BatchStream<P::Output> {
        Box::pin(try_stream! {
            loop {
                let reader = Arc::clone(&self);
                let next = tokio::task::spawn_blocking(move || reader.next_batch(batch_size))
                    .await
                    .map_err(|e| ReaderError::Worker(e.to_string()))?;
                match next {
                    Ok(batch) => yield batch,
                    Err(ReaderError::Cancelled) => {
                        if let Some(batch) = self.take_carried() {
                            yield batch;
                        }
                        return;
                    }
                    Err(e) => Err(e)?,
                }
            }
        })
    }
}
