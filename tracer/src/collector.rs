//! Metrics collection and aggregation
//!
//! Aggregates reported RTT records and computes statistics.

use crate::{sink::RttSink, types::*};
use parking_lot::Mutex;
use std::sync::Arc;

/// Metrics collector for aggregating RTT records
///
/// Holds running aggregates only, so its size stays fixed however long the
/// tracer runs.
#[derive(Default)]
pub struct MetricsCollector {
    /// Bucketed RTTs for percentile calculation
    distribution: RttDistribution,
    /// RTT histogram
    histogram: LatencyHistogram,
    /// Smallest and largest RTT seen, in microseconds
    min_us: Option<f64>,
    max_us: Option<f64>,
    /// Running sums for mean and standard deviation
    sum_us: f64,
    sum_sq_us: f64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reported record to the collector
    ///
    /// # Arguments
    ///
    /// * `record` - Matched begin/end pair from the correlation engine
    pub fn add_record(&mut self, record: &RttRecord) {
        let micros = record.elapsed.as_micros();
        let rtt_us = micros as f64;

        self.distribution.record(micros);
        self.histogram.add_sample(rtt_us);
        self.sum_us += rtt_us;
        self.sum_sq_us += rtt_us * rtt_us;
        self.min_us = Some(self.min_us.map_or(rtt_us, |m| m.min(rtt_us)));
        self.max_us = Some(self.max_us.map_or(rtt_us, |m| m.max(rtt_us)));
    }

    /// Generate aggregated metrics
    ///
    /// # Arguments
    ///
    /// * `elapsed_secs` - Duration of collection period in seconds
    /// * `pipeline` - Pipeline counters to attach to the report
    pub fn generate_metrics(&self, elapsed_secs: u64, pipeline: PipelineCounters) -> RttMetrics {
        let count = self.distribution.count();
        let (avg, std_dev) = if count == 0 {
            (0.0, 0.0)
        } else {
            let n = count as f64;
            let avg = self.sum_us / n;
            // Population variance; clamp rounding noise below zero
            let variance = (self.sum_sq_us / n - avg * avg).max(0.0);
            (avg, variance.sqrt())
        };

        RttMetrics {
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_seconds: elapsed_secs,
            total_samples: count,
            min_rtt_us: self.min_us.unwrap_or(0.0),
            max_rtt_us: self.max_us.unwrap_or(0.0),
            avg_rtt_us: avg,
            std_dev_us: std_dev,
            histogram: self.histogram.clone(),
            percentiles: self.distribution.percentiles(),
            pipeline,
        }
    }

    /// Get current sample count
    pub fn sample_count(&self) -> u64 {
        self.distribution.count()
    }

    /// Get histogram reference
    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }
}

impl RttSink for MetricsCollector {
    fn emit(&mut self, record: &RttRecord) {
        self.add_record(record);
    }
}

/// Collector shared between the correlation thread and the reporting side
pub type SharedCollector = Arc<Mutex<MetricsCollector>>;

impl RttSink for SharedCollector {
    fn emit(&mut self, record: &RttRecord) {
        self.lock().add_record(record);
    }
}
