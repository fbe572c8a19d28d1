//! Worker threads and lifecycle
//!
//! Spawns the capture and correlation threads around a shared
//! [`Pipeline`] and provides the handle used to stop and join them.

use crate::{
    capture::{CaptureProducer, PacketSource},
    config::TracerConfig,
    correlate::{CorrelationSummary, CorrelationWorker},
    extractor::FieldExtractor,
    pipeline::Pipeline,
    sink::RttSink,
    types::PipelineCounters,
};
use anyhow::{anyhow, Context, Result};
use log::info;
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::{sync::Notify, time::interval};

/// Outcome of a finished trace
#[derive(Debug)]
pub struct TraceReport {
    /// Counters after both threads stopped
    pub counters: PipelineCounters,
    /// Consumer-side summary
    pub correlation: CorrelationSummary,
    /// Why capture stopped, if it failed
    pub capture_error: Option<anyhow::Error>,
}

/// Handle to a running tracer
pub struct TracerHandle {
    pipeline: Arc<Pipeline>,
    capture_exited: Arc<Notify>,
    capture: JoinHandle<Result<()>>,
    correlate: JoinHandle<CorrelationSummary>,
}

/// Start the capture and correlation threads
///
/// # Arguments
///
/// * `config` - Validated tracer configuration
/// * `source` - Packet source, owned by the capture thread
/// * `sink` - Receives every reported record on the correlation thread
pub fn start<P, S>(config: &TracerConfig, source: P, sink: S) -> Result<TracerHandle>
where
    P: PacketSource + 'static,
    S: RttSink + Send + 'static,
{
    let extractor = FieldExtractor::new(config)?;
    let pipeline = Arc::new(Pipeline::new(config.batch.capacity));
    let capture_exited = Arc::new(Notify::new());

    let worker = CorrelationWorker::new(
        Arc::clone(&pipeline),
        config.threshold,
        config.batch.idle_polls,
        config.batch.poll_interval(),
        sink,
    );
    let correlate = thread::Builder::new()
        .name("rtt-correlate".to_string())
        .spawn(move || worker.run())
        .context("Failed to spawn correlation thread")?;

    let producer = CaptureProducer::new(source, extractor, Arc::clone(&pipeline));
    let exited = Arc::clone(&capture_exited);
    let capture = match thread::Builder::new().name("rtt-capture".to_string()).spawn(move || {
        let result = producer.run();
        exited.notify_one();
        result
    }) {
        Ok(handle) => handle,
        Err(e) => {
            // Let the correlation thread drain and exit before reporting
            pipeline.finish_producer();
            let _ = correlate.join();
            return Err(e).context("Failed to spawn capture thread");
        }
    };

    info!(
        "Tracer started: batch capacity {}, idle flush after {} x {:?}",
        config.batch.capacity,
        config.batch.idle_polls,
        config.batch.poll_interval()
    );

    Ok(TracerHandle {
        pipeline,
        capture_exited,
        capture,
        correlate,
    })
}

impl TracerHandle {
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Ask the capture thread to stop; the correlation thread drains after it
    pub fn shutdown(&self) {
        info!("Stopping capture...");
        self.pipeline.request_stop();
    }

    /// Resolves once the capture thread has exited for any reason
    pub async fn capture_exited(&self) {
        if self.capture.is_finished() {
            return;
        }
        self.capture_exited.notified().await;
    }

    /// Wait for both threads and collect the outcome
    ///
    /// Blocks; call after [`TracerHandle::shutdown`] or once capture has exited.
    pub fn join(self) -> Result<TraceReport> {
        let capture = self
            .capture
            .join()
            .map_err(|_| anyhow!("Capture thread panicked"));
        // The producer marks the pipeline finished even on error; after a
        // panic it never did, so do it here to release the consumer
        if capture.is_err() {
            self.pipeline.finish_producer();
        }
        let correlation = self
            .correlate
            .join()
            .map_err(|_| anyhow!("Correlation thread panicked"))?;
        let capture_error = capture?.err();

        Ok(TraceReport {
            counters: self.pipeline.stats().snapshot(),
            correlation,
            capture_error,
        })
    }
}

/// Spawn progress reporter
///
/// Creates a task that periodically logs pipeline counters.
///
/// # Arguments
///
/// * `pipeline` - Pipeline whose counters are reported
/// * `interval_secs` - Reporting interval in seconds
pub fn spawn_progress_reporter(pipeline: Arc<Pipeline>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let c = pipeline.stats().snapshot();
            info!(
                "Progress: {} frames, {} begin / {} end events, {} records, {} batches queued",
                c.frames_seen,
                c.begin_events,
                c.end_events,
                c.records_emitted,
                pipeline.queued()
            );
        }
    })
}
