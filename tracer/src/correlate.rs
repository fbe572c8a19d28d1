//! Correlation engine
//!
//! Pairs each end event with the most recent pending begin sharing its key
//! and reports the elapsed time. Runs on the consumer thread and owns the
//! pending table exclusively.

use crate::{
    batch::Batch,
    config::ThresholdConfig,
    idle::IdleFlushController,
    pipeline::{FlushOutcome, Pipeline, Poll},
    sink::RttSink,
    types::{ClassifiedEvent, CorrelationKey, Direction, Elapsed, PipelineStats, RttRecord, Timestamp},
};
use log::{debug, info};
use std::{
    collections::HashMap,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

/// Whether a match is noise
///
/// The microsecond part of the threshold only applies to sub-second
/// matches; any match of at least the threshold seconds and a non-zero
/// seconds part is reported.
fn below_threshold(elapsed: Elapsed, threshold: Elapsed) -> bool {
    elapsed.secs < threshold.secs || (elapsed.secs == 0 && elapsed.micros < threshold.micros)
}

/// In-flight begin table and matching rules
pub struct CorrelationEngine {
    pending: HashMap<CorrelationKey, Timestamp>,
    threshold: Elapsed,
    pipeline: Arc<Pipeline>,
}

impl CorrelationEngine {
    pub fn new(threshold: ThresholdConfig, pipeline: Arc<Pipeline>) -> Self {
        Self {
            pending: HashMap::new(),
            threshold: Elapsed::new(threshold.secs, threshold.micros),
            pipeline,
        }
    }

    fn stats(&self) -> &PipelineStats {
        self.pipeline.stats()
    }

    /// Number of begins waiting for their end
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply one event to the pending table
    ///
    /// A begin replaces any pending begin with the same key. An end consumes
    /// the pending begin whether or not a record results.
    pub fn observe(&mut self, event: &ClassifiedEvent) -> Option<RttRecord> {
        match event.direction {
            Direction::Begin => {
                if self.pending.insert(event.key, event.timestamp).is_some() {
                    PipelineStats::incr(&self.stats().begins_overwritten);
                }
                None
            }
            Direction::End => {
                let Some(begin) = self.pending.remove(&event.key) else {
                    PipelineStats::incr(&self.stats().unmatched_ends);
                    return None;
                };
                // End captured before its begin: reordering or a stale begin.
                // Either way there is no meaningful interval to report.
                let Some(elapsed) = Elapsed::between(begin, event.timestamp) else {
                    PipelineStats::incr(&self.stats().clock_anomalies);
                    return None;
                };
                if below_threshold(elapsed, self.threshold) {
                    PipelineStats::incr(&self.stats().below_threshold);
                    return None;
                }
                Some(RttRecord {
                    begin,
                    elapsed,
                    key: event.key,
                })
            }
        }
    }

    /// Process every event of a batch in arrival order
    ///
    /// Returns the number of records emitted.
    pub fn process_batch(&mut self, batch: &Batch, sink: &mut dyn RttSink) -> usize {
        let mut emitted = 0;
        for event in batch.events() {
            if let Some(record) = self.observe(event) {
                sink.emit(&record);
                emitted += 1;
            }
        }
        self.stats()
            .records_emitted
            .fetch_add(emitted as u64, Ordering::Relaxed);
        emitted
    }
}

/// Summary returned by the consumer thread
#[derive(Debug, Clone, Default)]
pub struct CorrelationSummary {
    /// Batches processed
    pub batches: u64,
    /// Records emitted
    pub records: u64,
    /// Begins still pending at exit
    pub pending_at_exit: usize,
}

/// Consumer loop: drain batches, correlate, flush the producer when idle
pub struct CorrelationWorker<S: RttSink> {
    engine: CorrelationEngine,
    idle: IdleFlushController,
    poll_interval: Duration,
    pipeline: Arc<Pipeline>,
    sink: S,
}

impl<S: RttSink> CorrelationWorker<S> {
    pub fn new(
        pipeline: Arc<Pipeline>,
        threshold: ThresholdConfig,
        idle_polls: u32,
        poll_interval: Duration,
        sink: S,
    ) -> Self {
        Self {
            engine: CorrelationEngine::new(threshold, Arc::clone(&pipeline)),
            idle: IdleFlushController::new(idle_polls),
            poll_interval,
            pipeline,
            sink,
        }
    }

    /// Run until the producer has finished and every batch is processed
    pub fn run(mut self) -> CorrelationSummary {
        let mut summary = CorrelationSummary::default();
        info!("Correlation worker started");

        loop {
            match self.pipeline.poll(self.poll_interval) {
                Poll::Batch(batch) => {
                    self.idle.on_batch();
                    let emitted = self.engine.process_batch(&batch, &mut self.sink);
                    summary.batches += 1;
                    summary.records += emitted as u64;
                    self.pipeline.recycle(batch);
                }
                Poll::Empty => {
                    if self.idle.on_empty() {
                        match self.pipeline.force_flush() {
                            FlushOutcome::Published(n) => debug!("Idle flush published {} events", n),
                            FlushOutcome::Contended => debug!("Idle flush skipped: producer busy"),
                            FlushOutcome::Empty => {}
                        }
                    }
                }
                Poll::Drained => break,
            }
        }

        summary.pending_at_exit = self.engine.pending_len();
        info!(
            "Correlation worker stopped: {} batches, {} records, {} begins unmatched",
            summary.batches, summary.records, summary.pending_at_exit
        );
        summary
    }
}
