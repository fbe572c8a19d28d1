//! Shared pipeline context
//!
//! Owns everything the capture and correlation threads share: the batch
//! queue and buffer pool behind one lock, the producer's current batch
//! behind the append guard, the shutdown flags and the counters.
//!
//! Lock order is append guard, then exchange. The consumer only ever
//! `try_lock`s the append guard.

use crate::{
    batch::{Batch, BufferPool},
    types::PipelineStats,
};
use log::debug;
use parking_lot::{Condvar, Mutex};
use rtt_common::ClassifiedEvent;
use std::{
    collections::VecDeque,
    mem,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// Batch queue and buffer pool, always mutated together
#[derive(Debug)]
struct Exchange {
    queue: VecDeque<Batch>,
    pool: BufferPool,
}

/// Result of a forced flush request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The partial batch with this many events was published
    Published(usize),
    /// The producer's batch held no events
    Empty,
    /// The producer was mid-append; retry on a later cycle
    Contended,
}

/// Result of waiting for a batch
#[derive(Debug)]
pub enum Poll {
    Batch(Batch),
    /// The queue stayed empty for the whole poll interval
    Empty,
    /// The producer finished and every batch has been handed out
    Drained,
}

/// Context shared by the capture and correlation threads
#[derive(Debug)]
pub struct Pipeline {
    exchange: Mutex<Exchange>,
    available: Condvar,
    current: Mutex<Batch>,
    stop: AtomicBool,
    producer_done: AtomicBool,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(batch_capacity: usize) -> Self {
        let mut pool = BufferPool::new(batch_capacity);
        let current = pool.acquire();

        Self {
            exchange: Mutex::new(Exchange {
                queue: VecDeque::new(),
                pool,
            }),
            available: Condvar::new(),
            current: Mutex::new(current),
            stop: AtomicBool::new(false),
            producer_done: AtomicBool::new(false),
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Append an event to the producer's batch, publishing it once full
    pub fn append(&self, event: ClassifiedEvent) {
        let mut current = self.current.lock();
        if current.push(event) {
            self.publish(&mut current);
        }
    }

    /// Swap the current batch for a pooled one and queue it
    ///
    /// Caller holds the append guard.
    fn publish(&self, current: &mut Batch) -> usize {
        let len = current.len();
        {
            let mut exchange = self.exchange.lock();
            let fresh = exchange.pool.acquire();
            let full = mem::replace(current, fresh);
            exchange.queue.push_back(full);
        }
        self.stats.batches_published.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
        len
    }

    /// Publish the producer's partial batch unless an append is in progress
    pub fn force_flush(&self) -> FlushOutcome {
        let Some(mut current) = self.current.try_lock() else {
            self.stats.flushes_skipped.fetch_add(1, Ordering::Relaxed);
            return FlushOutcome::Contended;
        };
        if current.is_empty() {
            return FlushOutcome::Empty;
        }
        let len = self.publish(&mut current);
        self.stats.flushes_forced.fetch_add(1, Ordering::Relaxed);
        FlushOutcome::Published(len)
    }

    /// Pop the oldest queued batch without waiting
    pub fn try_pop(&self) -> Option<Batch> {
        self.exchange.lock().queue.pop_front()
    }

    /// Wait up to `interval` for a queued batch
    pub fn poll(&self, interval: Duration) -> Poll {
        let mut exchange = self.exchange.lock();
        if exchange.queue.is_empty() && !self.is_producer_done() {
            self.available.wait_for(&mut exchange, interval);
        }
        match exchange.queue.pop_front() {
            Some(batch) => Poll::Batch(batch),
            None if self.is_producer_done() => Poll::Drained,
            None => Poll::Empty,
        }
    }

    /// Clear a processed batch and return it to the pool
    pub fn recycle(&self, batch: Batch) {
        self.exchange.lock().pool.release(batch);
    }

    /// Number of batches waiting for the consumer
    pub fn queued(&self) -> usize {
        self.exchange.lock().queue.len()
    }

    /// Number of batches allocated so far
    pub fn allocated_batches(&self) -> usize {
        self.exchange.lock().pool.allocated()
    }

    /// Ask the producer to stop at its next frame boundary
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Publish whatever the producer still holds and wake the consumer to drain
    pub fn finish_producer(&self) {
        {
            let mut current = self.current.lock();
            if !current.is_empty() {
                let len = self.publish(&mut current);
                debug!("Published final partial batch of {} events", len);
            }
        }
        // Set under the exchange lock so a consumer between its empty check
        // and its wait cannot miss the wakeup
        let _exchange = self.exchange.lock();
        self.producer_done.store(true, Ordering::Release);
        self.available.notify_all();
    }

    pub fn is_producer_done(&self) -> bool {
        self.producer_done.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtt_common::{CorrelationKey, Timestamp};
    use std::{sync::Arc, thread};

    fn event(n: u64) -> ClassifiedEvent {
        ClassifiedEvent::begin(Timestamp::new(0, n as u32), CorrelationKey::new(n, 0, 0))
    }

    #[test]
    fn test_rotation_at_exact_capacity() {
        let pipeline = Pipeline::new(4);
        for n in 0..3 {
            pipeline.append(event(n));
        }
        assert_eq!(pipeline.queued(), 0);

        pipeline.append(event(3));
        assert_eq!(pipeline.queued(), 1);
        assert_eq!(pipeline.stats().batches_published.load(Ordering::Relaxed), 1);

        let batch = pipeline.try_pop().unwrap();
        assert_eq!(batch.len(), 4);
        assert!(pipeline.try_pop().is_none());
    }

    #[test]
    fn test_queue_is_fifo() {
        let pipeline = Pipeline::new(2);
        for n in 0..6 {
            pipeline.append(event(n));
        }
        let firsts: Vec<u64> = std::iter::from_fn(|| pipeline.try_pop())
            .map(|b| b.events()[0].key.0[0])
            .collect();
        assert_eq!(firsts, vec![0, 2, 4]);
    }

    #[test]
    fn test_force_flush_publishes_partial_batch() {
        let pipeline = Pipeline::new(100);
        assert_eq!(pipeline.force_flush(), FlushOutcome::Empty);

        pipeline.append(event(1));
        assert_eq!(pipeline.force_flush(), FlushOutcome::Published(1));
        assert_eq!(pipeline.try_pop().unwrap().len(), 1);
        assert_eq!(pipeline.force_flush(), FlushOutcome::Empty);
    }

    #[test]
    fn test_force_flush_skips_while_appending() {
        let pipeline = Pipeline::new(100);
        pipeline.append(event(1));

        let guard = pipeline.current.lock();
        assert_eq!(pipeline.force_flush(), FlushOutcome::Contended);
        drop(guard);

        assert_eq!(pipeline.force_flush(), FlushOutcome::Published(1));
        assert_eq!(pipeline.stats().flushes_skipped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_recycled_batches_are_reused() {
        let pipeline = Pipeline::new(1);
        for n in 0..10 {
            pipeline.append(event(n));
            let batch = pipeline.try_pop().unwrap();
            pipeline.recycle(batch);
        }
        // The initial batch plus one replacement in flight
        assert_eq!(pipeline.allocated_batches(), 2);
    }

    #[test]
    fn test_poll_reports_empty_then_drained() {
        let pipeline = Pipeline::new(10);
        assert!(matches!(pipeline.poll(Duration::from_millis(5)), Poll::Empty));

        pipeline.append(event(1));
        pipeline.finish_producer();
        assert!(matches!(pipeline.poll(Duration::from_millis(5)), Poll::Batch(b) if b.len() == 1));
        assert!(matches!(pipeline.poll(Duration::from_millis(5)), Poll::Drained));
    }

    #[test]
    fn test_poll_wakes_on_publish() {
        let pipeline = Arc::new(Pipeline::new(1));
        let producer = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                pipeline.append(event(7));
            })
        };

        let polled = pipeline.poll(Duration::from_secs(10));
        producer.join().unwrap();
        assert!(matches!(polled, Poll::Batch(b) if b.events()[0].key.0[0] == 7));
    }
}
