// src/reader/ring.rs
//
// Sequence-keyed prefetch ring shared by the producer threads and the consumer.
//
// Every record taken from the loader gets a sequence number. A producer stores
// its finished slot at `seq % depth` once `seq < head + depth`; the consumer
// only ever takes the slot at `head`. Completions that arrive out of order
// therefore wait in their own slot until their predecessors are consumed, and
// delivery order is exactly loader order.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::{ReaderError, Result};

/// What a producer hands over for one sequence number.
#[derive(Debug)]
pub(crate) enum SlotItem<T> {
    Sample(T),
    /// Nothing to deliver (skipped record or bare epoch marker).
    Skipped,
    Failed(ReaderError),
}

#[derive(Debug)]
pub(crate) struct Slot<T> {
    pub item: SlotItem<T>,
    /// The epoch ends after this slot.
    pub ends_epoch: bool,
}

/// Why `take` came back without a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Empty {
    /// Production is over and nothing is queued at the head.
    Exhausted,
    /// A wait for the head slot was cut short by `cancel`.
    Interrupted,
}

struct RingState<T> {
    slots: Vec<Option<Slot<T>>>,
    head: u64,
    occupied: usize,
    cancelled: bool,
    live_producers: usize,
}

pub(crate) struct PrefetchRing<T> {
    depth: usize,
    state: Mutex<RingState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> PrefetchRing<T> {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            state: Mutex::new(RingState {
                slots: (0..depth).map(|_| None).collect(),
                head: 0,
                occupied: 0,
                cancelled: false,
                live_producers: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    // A panicking producer must not wedge shutdown, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_producers(&self, n: usize) {
        self.lock().live_producers = n;
    }

    /// Store the slot for `seq`, blocking until it falls inside the window.
    pub fn put(&self, seq: u64, slot: Slot<T>) -> Result<()> {
        let mut st = self.lock();
        while !st.cancelled && seq >= st.head + self.depth as u64 {
            st = self.not_full.wait(st).unwrap_or_else(|p| p.into_inner());
        }
        if st.cancelled {
            return Err(ReaderError::Cancelled);
        }

        let i = (seq % self.depth as u64) as usize;
        debug_assert!(st.slots[i].is_none());
        st.slots[i] = Some(slot);
        st.occupied += 1;
        if seq == st.head {
            self.not_empty.notify_all();
        }
        Ok(())
    }

    /// Take the slot at the head, blocking until it is filled.
    ///
    /// Fails with `Exhausted` when the head slot is empty and no producer can
    /// fill it any more, and with `Interrupted` when `cancel` ends a wait.
    pub fn take(&self) -> std::result::Result<Slot<T>, Empty> {
        let mut st = self.lock();
        let mut waited = false;
        loop {
            let i = (st.head % self.depth as u64) as usize;
            if let Some(slot) = st.slots[i].take() {
                st.head += 1;
                st.occupied -= 1;
                self.not_full.notify_all();
                return Ok(slot);
            }
            if st.cancelled && waited {
                return Err(Empty::Interrupted);
            }
            if st.cancelled || st.live_producers == 0 {
                return Err(Empty::Exhausted);
            }
            st = self.not_empty.wait(st).unwrap_or_else(|p| p.into_inner());
            waited = true;
        }
    }

    pub fn producer_exited(&self) {
        let mut st = self.lock();
        st.live_producers = st.live_producers.saturating_sub(1);
        if st.live_producers == 0 {
            self.not_empty.notify_all();
        }
    }

    /// Release every waiter. With `discard`, queued slots are dropped too.
    pub fn cancel(&self, discard: bool) {
        let mut st = self.lock();
        st.cancelled = true;
        if discard {
            st.slots.iter_mut().for_each(|s| *s = None);
            st.occupied = 0;
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn occupancy(&self) -> usize {
        self.lock().occupied
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn sample(v: u32) -> Slot<u32> {
        Slot { item: SlotItem::Sample(v), ends_epoch: false }
    }

    fn value(slot: Slot<u32>) -> u32 {
        match slot.item {
            SlotItem::Sample(v) => v,
            other => panic!("unexpected slot {:?}", other),
        }
    }

    #[test]
    fn out_of_order_puts_are_taken_in_sequence() {
        let ring = PrefetchRing::new(4);
        ring.set_producers(1);
        ring.put(2, sample(20)).unwrap();
        ring.put(0, sample(0)).unwrap();
        ring.put(1, sample(10)).unwrap();
        assert_eq!(ring.occupancy(), 3);
        assert_eq!(value(ring.take().unwrap()), 0);
        assert_eq!(value(ring.take().unwrap()), 10);
        assert_eq!(value(ring.take().unwrap()), 20);
        assert_eq!(ring.occupancy(), 0);
    }

    #[test]
    fn producer_outside_window_waits_for_consumer() {
        let ring = Arc::new(PrefetchRing::new(1));
        ring.set_producers(1);
        ring.put(0, sample(0)).unwrap();

        let r = ring.clone();
        let producer = thread::spawn(move || r.put(1, sample(1)));
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(ring.occupancy(), 1);

        assert_eq!(value(ring.take().unwrap()), 0);
        producer.join().unwrap().unwrap();
        assert_eq!(value(ring.take().unwrap()), 1);
    }

    #[test]
    fn cancel_releases_blocked_consumer() {
        let ring: Arc<PrefetchRing<u32>> = Arc::new(PrefetchRing::new(2));
        ring.set_producers(1);
        let r = ring.clone();
        let consumer = thread::spawn(move || r.take());
        thread::sleep(Duration::from_millis(50));
        ring.cancel(false);
        assert_eq!(consumer.join().unwrap().err(), Some(Empty::Interrupted));
        assert!(matches!(ring.put(0, sample(1)), Err(ReaderError::Cancelled)));
    }

    #[test]
    fn queued_slots_survive_plain_cancel() {
        let ring = PrefetchRing::new(2);
        ring.set_producers(1);
        ring.put(0, sample(5)).unwrap();
        ring.cancel(false);
        assert_eq!(value(ring.take().unwrap()), 5);
        assert_eq!(ring.take().err(), Some(Empty::Exhausted));
    }

    #[test]
    fn waiting_consumer_sees_exhaustion_when_producers_exit() {
        let ring: Arc<PrefetchRing<u32>> = Arc::new(PrefetchRing::new(2));
        ring.set_producers(1);
        let r = ring.clone();
        let consumer = thread::spawn(move || r.take());
        thread::sleep(Duration::from_millis(50));
        ring.producer_exited();
        assert_eq!(consumer.join().unwrap().err(), Some(Empty::Exhausted));
    }

    #[test]
    fn last_producer_exit_ends_consumer_wait() {
        let ring: PrefetchRing<u32> = PrefetchRing::new(2);
        ring.set_producers(2);
        ring.producer_exited();
        ring.producer_exited();
        assert_eq!(ring.take().err(), Some(Empty::Exhausted));
    }
}
