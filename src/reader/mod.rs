// src/reader/mod.rs
//
// Multi-threaded prefetching reader.
//
// N producer threads pull records from one shared `RecordSource`, parse them
// in parallel and park the results in a sequence-keyed ring (see `ring.rs`).
// The consumer assembles batches from the ring head, so samples come out in
// exactly the order the source produced them, regardless of which worker
// finished first.
//
//   Idle --start--> Running --drain--> Draining
//                     |                    |
//                     +------stop----------+--> Stopped
//
// A drained or stopped reader hands out what is still queued, then `Cancelled`.

mod ring;
pub mod stream;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::error::{ReaderError, Result};
use crate::loader::{Fetched, RecordSource};
use crate::options::ReaderOptions;
use crate::parser::RecordParser;

use ring::{Empty, PrefetchRing, Slot, SlotItem};

pub use stream::BatchStream;

/// Lifecycle of a [`PrefetchingReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl ReaderState {
    pub fn name(&self) -> &'static str {
        match self {
            ReaderState::Idle => "Idle",
            ReaderState::Running => "Running",
            ReaderState::Draining => "Draining",
            ReaderState::Stopped => "Stopped",
        }
    }
}

/// Samples delivered by one `next_batch` call.
#[derive(Debug)]
pub struct Batch<T> {
    pub samples: Vec<T>,
    /// The last sample of this batch closes an epoch.
    pub epoch_boundary: bool,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

/// Point-in-time counters of a reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Records handed out by the source.
    pub records_loaded: u64,
    /// Samples returned to callers.
    pub samples_delivered: u64,
    /// Records dropped by the source for bad framing or checksums.
    pub corrupt_skipped: u64,
    /// Records dropped because they failed to parse.
    pub unparseable_skipped: u64,
    /// Epoch boundaries returned to callers.
    pub epochs_completed: u64,
}

#[derive(Default)]
struct Counters {
    records_loaded: AtomicU64,
    samples_delivered: AtomicU64,
    corrupt_skipped: AtomicU64,
    unparseable_skipped: AtomicU64,
    epochs_completed: AtomicU64,
}

struct SourceState<S> {
    source: S,
    next_seq: u64,
    /// The coming `EndOfEpoch` was already attached to a record slot.
    boundary_sent: bool,
}

struct Shared<S, P: RecordParser> {
    source: Mutex<SourceState<S>>,
    parser: P,
    ring: PrefetchRing<P::Output>,
    strict: bool,
    /// Producers stop taking new records once set.
    stop_pulling: AtomicBool,
    counters: Counters,
}

struct ConsumerState<T> {
    /// Samples collected by a call that `stop()` woke mid-batch.
    carry: Vec<T>,
}

/// Prefetching, order-preserving batch reader over a [`RecordSource`].
pub struct PrefetchingReader<S: RecordSource, P: RecordParser> {
    shared: Arc<Shared<S, P>>,
    workers: usize,
    state: Mutex<ReaderState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    consumer: Mutex<ConsumerState<P::Output>>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl<S: RecordSource, P: RecordParser> PrefetchingReader<S, P> {
    /// Build an idle reader. Only `prefetch_depth`, `worker_count` and
    /// `strict_checksums` are read from `opts`; ordering and sharding belong
    /// to the source.
    pub fn new(source: S, parser: P, opts: &ReaderOptions) -> Result<Self> {
        opts.validate()?;
        if source.epoch_len() == 0 {
            return Err(ReaderError::InvalidConfig("record source is empty".into()));
        }
        let workers = opts.effective_workers();
        debug!(
            "prefetching reader: {} workers, depth {}, {} records per epoch",
            workers,
            opts.prefetch_depth,
            source.epoch_len()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                source: Mutex::new(SourceState { source, next_seq: 0, boundary_sent: false }),
                parser,
                ring: PrefetchRing::new(opts.prefetch_depth),
                strict: opts.strict_checksums,
                stop_pulling: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            workers,
            state: Mutex::new(ReaderState::Idle),
            handles: Mutex::new(Vec::new()),
            consumer: Mutex::new(ConsumerState { carry: Vec::new() }),
        })
    }

    pub fn state(&self) -> ReaderState {
        *relock(&self.state)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn prefetch_depth(&self) -> usize {
        self.shared.ring.depth()
    }

    /// Parsed samples currently waiting in the prefetch ring.
    pub fn buffered(&self) -> usize {
        self.shared.ring.occupancy()
    }

    pub fn stats(&self) -> ReaderStats {
        let c = &self.shared.counters;
        ReaderStats {
            records_loaded: c.records_loaded.load(Ordering::Relaxed),
            samples_delivered: c.samples_delivered.load(Ordering::Relaxed),
            corrupt_skipped: c.corrupt_skipped.load(Ordering::Relaxed),
            unparseable_skipped: c.unparseable_skipped.load(Ordering::Relaxed),
            epochs_completed: c.epochs_completed.load(Ordering::Relaxed),
        }
    }

    /// Spawn the producer threads. Idle -> Running.
    pub fn start(&self) -> Result<()> {
        let mut state = relock(&self.state);
        if *state != ReaderState::Idle {
            return Err(ReaderError::InvalidState { expected: "Idle", found: state.name() });
        }

        self.shared.ring.set_producers(self.workers);
        let mut handles = relock(&self.handles);
        for id in 0..self.workers {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("recdlio-worker-{}", id))
                .spawn(move || worker_loop(id, shared));
            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => {
                    error!("failed to spawn worker {}: {}", id, e);
                    // the threads that never started still count as producers
                    for _ in id..self.workers {
                        self.shared.ring.producer_exited();
                    }
                    self.shared.stop_pulling.store(true, Ordering::Release);
                    self.shared.ring.cancel(true);
                    *state = ReaderState::Stopped;
                    let started = std::mem::take(&mut *handles);
                    drop(handles);
                    drop(state);
                    join_all(started);
                    return Err(ReaderError::Worker(format!("spawn worker {}: {}", id, e)));
                }
            }
        }

        *state = ReaderState::Running;
        info!("reader started with {} workers", self.workers);
        Ok(())
    }

    /// Return up to `n` samples in source order, blocking until they are ready.
    ///
    /// A batch is cut short at an epoch boundary. Errors end the run: the
    /// reader stops and the samples gathered by this call are discarded.
    /// After `stop()` or `drain()`, samples already queued can still be read,
    /// the last of them possibly as a short batch; once none are left every
    /// call returns `Cancelled`. A call woken by `stop()` while waiting returns
    /// `Cancelled` and leaves its samples to the next call.
    pub fn next_batch(&self, n: usize) -> Result<Batch<P::Output>> {
        if n == 0 {
            return Err(ReaderError::InvalidConfig("batch size must be at least 1".into()));
        }
        let state = self.state();
        if state == ReaderState::Idle {
            return Err(ReaderError::InvalidState { expected: "Running", found: state.name() });
        }

        let mut consumer = relock(&self.consumer);
        let mut samples = std::mem::take(&mut consumer.carry);
        if samples.len() >= n {
            consumer.carry = samples.split_off(n);
            return Ok(self.deliver(samples, false));
        }

        while samples.len() < n {
            let slot = match self.shared.ring.take() {
                Ok(slot) => slot,
                Err(Empty::Exhausted) if samples.is_empty() => return Err(ReaderError::Cancelled),
                Err(Empty::Exhausted) => return Ok(self.deliver(samples, false)),
                Err(Empty::Interrupted) => {
                    consumer.carry = samples;
                    return Err(ReaderError::Cancelled);
                }
            };
            match slot.item {
                SlotItem::Sample(s) => samples.push(s),
                SlotItem::Skipped => {}
                SlotItem::Failed(e) => {
                    drop(consumer);
                    error!("reader failed: {}", e);
                    self.halt();
                    return Err(e);
                }
            }
            if slot.ends_epoch {
                self.shared.counters.epochs_completed.fetch_add(1, Ordering::Relaxed);
                return Ok(self.deliver(samples, true));
            }
        }
        Ok(self.deliver(samples, false))
    }

    /// Samples left behind by a call that `stop()` interrupted, if any.
    pub(crate) fn take_carried(&self) -> Option<Batch<P::Output>> {
        let carry = std::mem::take(&mut relock(&self.consumer).carry);
        (!carry.is_empty()).then(|| self.deliver(carry, false))
    }

    fn deliver(&self, samples: Vec<P::Output>, epoch_boundary: bool) -> Batch<P::Output> {
        self.shared
            .counters
            .samples_delivered
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        Batch { samples, epoch_boundary }
    }

    /// Stop pulling new records; queued and in-flight samples stay readable.
    /// Running -> Draining.
    pub fn drain(&self) -> Result<()> {
        let mut state = relock(&self.state);
        if *state != ReaderState::Running {
            return Err(ReaderError::InvalidState { expected: "Running", found: state.name() });
        }
        self.shared.stop_pulling.store(true, Ordering::Release);
        *state = ReaderState::Draining;
        info!("reader draining");
        Ok(())
    }

    /// Cancel all waiters and join the workers. Stopping twice is a no-op.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = relock(&self.state);
            match *state {
                ReaderState::Idle => {
                    return Err(ReaderError::InvalidState {
                        expected: "Running",
                        found: state.name(),
                    });
                }
                ReaderState::Stopped => return Ok(()),
                ReaderState::Running | ReaderState::Draining => *state = ReaderState::Stopped,
            }
        }
        self.shutdown(false);
        info!("reader stopped");
        Ok(())
    }

    // Error path: nothing queued behind a failure may be delivered.
    fn halt(&self) {
        *relock(&self.state) = ReaderState::Stopped;
        self.shutdown(true);
    }

    fn shutdown(&self, discard: bool) {
        self.shared.stop_pulling.store(true, Ordering::Release);
        self.shared.ring.cancel(discard);
        let handles = std::mem::take(&mut *relock(&self.handles));
        join_all(handles);
    }
}

impl<S: RecordSource, P: RecordParser> Drop for PrefetchingReader<S, P> {
    fn drop(&mut self) {
        let state = *relock(&self.state);
        if matches!(state, ReaderState::Running | ReaderState::Draining) {
            debug!("reader dropped while {}", state.name());
            *relock(&self.state) = ReaderState::Stopped;
            self.shutdown(false);
        }
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for h in handles {
        if h.join().is_err() {
            warn!("reader worker panicked");
        }
    }
}

struct ProducerGuard<'a, T> {
    ring: &'a PrefetchRing<T>,
}

impl<T> Drop for ProducerGuard<'_, T> {
    fn drop(&mut self) {
        self.ring.producer_exited();
    }
}

/// Take the next sequence number and its record from the source.
///
/// Returns `None` once producers were told to stop.
fn pull<S: RecordSource, P: RecordParser>(
    shared: &Shared<S, P>,
) -> Option<(u64, Result<Fetched>, bool)> {
    let mut src = relock(&shared.source);
    loop {
        if shared.stop_pulling.load(Ordering::Acquire) {
            return None;
        }
        let fetched = src.source.next_record();
        shared
            .counters
            .corrupt_skipped
            .store(src.source.skipped(), Ordering::Relaxed);

        let ends_epoch = match &fetched {
            Ok(Fetched::Record(_)) => {
                shared.counters.records_loaded.fetch_add(1, Ordering::Relaxed);
                let last = src.source.remaining_in_epoch() == 0;
                src.boundary_sent = last;
                last
            }
            Ok(Fetched::EndOfEpoch) if src.boundary_sent => {
                // already travelled with the epoch's last record
                src.boundary_sent = false;
                continue;
            }
            Ok(Fetched::EndOfEpoch) => true,
            Err(_) => false,
        };

        let seq = src.next_seq;
        src.next_seq += 1;
        return Some((seq, fetched, ends_epoch));
    }
}

fn worker_loop<S: RecordSource, P: RecordParser>(id: usize, shared: Arc<Shared<S, P>>) {
    let _guard = ProducerGuard { ring: &shared.ring };
    debug!("worker {} started", id);

    while let Some((seq, fetched, ends_epoch)) = pull(&*shared) {
        let item = match fetched {
            Ok(Fetched::EndOfEpoch) => SlotItem::Skipped,
            Ok(Fetched::Record(raw)) => match shared.parser.parse(raw) {
                Ok(sample) => SlotItem::Sample(sample),
                Err(e) if !shared.strict => {
                    shared.counters.unparseable_skipped.fetch_add(1, Ordering::Relaxed);
                    warn!("skipping unparseable record: {}", e);
                    SlotItem::Skipped
                }
                Err(e) => SlotItem::Failed(e.into()),
            },
            Err(e) => SlotItem::Failed(e),
        };

        let fatal = matches!(item, SlotItem::Failed(_));
        if fatal {
            shared.stop_pulling.store(true, Ordering::Release);
        }
        if shared.ring.put(seq, Slot { item, ends_epoch }).is_err() || fatal {
            break;
        }
    }
    debug!("worker {} exiting", id);
}
