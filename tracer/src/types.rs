//! Userspace type definitions
//!
//! Defines the records produced by the correlation engine and the data
//! structures used for metrics collection and export.
//!
//! ## Organization
//!
//! - **Event Types**: values shared with the capture side (from rtt_common)
//! - **Result Types**: matched intervals produced by correlation
//! - **Metrics Types**: counters and aggregates used for reporting

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

// ============================================================================
// Event Types (shared with the capture side)
// ============================================================================

pub use rtt_common::{ClassifiedEvent, CorrelationKey, Direction, Timestamp, MICROS_PER_SEC};

// ============================================================================
// Result Types
// ============================================================================

/// Elapsed time between a begin and its end
///
/// Seconds are signed so an end preceding its begin is representable;
/// the correlation engine never reports such a value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Elapsed {
    pub secs: i64,
    /// Always below [`MICROS_PER_SEC`]
    pub micros: u32,
}

impl Elapsed {
    pub const fn new(secs: i64, micros: u32) -> Self {
        Self { secs, micros }
    }

    /// Elapsed time from `begin` to `end`, borrowing a second when needed
    ///
    /// Returns `None` when `end` precedes `begin`.
    pub fn between(begin: Timestamp, end: Timestamp) -> Option<Self> {
        let mut secs = end.secs - begin.secs;
        let micros = if end.micros >= begin.micros {
            end.micros - begin.micros
        } else {
            if secs <= 0 {
                return None;
            }
            secs -= 1;
            end.micros + MICROS_PER_SEC - begin.micros
        };
        if secs < 0 {
            return None;
        }
        Some(Self { secs, micros })
    }

    /// Total elapsed microseconds
    pub fn as_micros(&self) -> u64 {
        self.secs.max(0) as u64 * u64::from(MICROS_PER_SEC) + u64::from(self.micros)
    }
}

impl fmt::Display for Elapsed {
    /// `<s>s<us>us`, seconds omitted when zero
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secs == 0 {
            write!(f, "{}us", self.micros)
        } else {
            write!(f, "{}s{}us", self.secs, self.micros)
        }
    }
}

/// A matched begin/end pair at or above the noise threshold
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttRecord {
    /// Capture time of the begin packet
    pub begin: Timestamp,
    /// Time from begin to end
    pub elapsed: Elapsed,
    /// Key shared by both packets
    pub key: CorrelationKey,
}

// ============================================================================
// Metrics Types
// ============================================================================

/// Live pipeline counters shared by both worker threads
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Frames delivered by the packet source
    pub frames_seen: AtomicU64,
    /// Frames matching no role
    pub frames_unmatched: AtomicU64,
    /// Frames whose role matched but marker did not
    pub marker_mismatches: AtomicU64,
    /// Frames shorter than the configured layout
    pub frames_truncated: AtomicU64,
    /// Begin events classified
    pub begin_events: AtomicU64,
    /// End events classified
    pub end_events: AtomicU64,
    /// Batches handed to the consumer, full or flushed
    pub batches_published: AtomicU64,
    /// Partial batches published by idle flush
    pub flushes_forced: AtomicU64,
    /// Idle flushes skipped because an append was in progress
    pub flushes_skipped: AtomicU64,
    /// Pending begins replaced by a later begin with the same key
    pub begins_overwritten: AtomicU64,
    /// Ends with no pending begin
    pub unmatched_ends: AtomicU64,
    /// Ends timestamped before their begin
    pub clock_anomalies: AtomicU64,
    /// Matches faster than the noise threshold
    pub below_threshold: AtomicU64,
    /// Records emitted to the sinks
    pub records_emitted: AtomicU64,
}

impl PipelineStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> PipelineCounters {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineCounters {
            frames_seen: get(&self.frames_seen),
            frames_unmatched: get(&self.frames_unmatched),
            marker_mismatches: get(&self.marker_mismatches),
            frames_truncated: get(&self.frames_truncated),
            begin_events: get(&self.begin_events),
            end_events: get(&self.end_events),
            batches_published: get(&self.batches_published),
            flushes_forced: get(&self.flushes_forced),
            flushes_skipped: get(&self.flushes_skipped),
            begins_overwritten: get(&self.begins_overwritten),
            unmatched_ends: get(&self.unmatched_ends),
            clock_anomalies: get(&self.clock_anomalies),
            below_threshold: get(&self.below_threshold),
            records_emitted: get(&self.records_emitted),
        }
    }
}

/// Snapshot of [`PipelineStats`]
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineCounters {
    pub frames_seen: u64,
    pub frames_unmatched: u64,
    pub marker_mismatches: u64,
    pub frames_truncated: u64,
    pub begin_events: u64,
    pub end_events: u64,
    pub batches_published: u64,
    pub flushes_forced: u64,
    pub flushes_skipped: u64,
    pub begins_overwritten: u64,
    pub unmatched_ends: u64,
    pub clock_anomalies: u64,
    pub below_threshold: u64,
    pub records_emitted: u64,
}

/// Aggregated metrics for export
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RttMetrics {
    /// ISO 8601 timestamp when metrics were collected
    pub timestamp: String,
    /// Duration of collection period in seconds
    pub duration_seconds: u64,
    /// Number of RTT samples aggregated
    pub total_samples: u64,
    /// Smallest RTT in microseconds
    pub min_rtt_us: f64,
    /// Largest RTT in microseconds
    pub max_rtt_us: f64,
    /// Mean RTT in microseconds
    pub avg_rtt_us: f64,
    /// Standard deviation in microseconds
    pub std_dev_us: f64,
    /// RTT histogram
    pub histogram: LatencyHistogram,
    /// RTT percentiles
    pub percentiles: Percentiles,
    /// Pipeline counters at the time of collection
    pub pipeline: PipelineCounters,
}

/// Latency histogram buckets
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct LatencyHistogram {
    /// 0-1ms bucket
    #[serde(rename = "0-1ms")]
    pub bucket_0_1ms: u64,
    /// 1-5ms bucket
    #[serde(rename = "1-5ms")]
    pub bucket_1_5ms: u64,
    /// 5-10ms bucket
    #[serde(rename = "5-10ms")]
    pub bucket_5_10ms: u64,
    /// 10-50ms bucket
    #[serde(rename = "10-50ms")]
    pub bucket_10_50ms: u64,
    /// 50-100ms bucket
    #[serde(rename = "50-100ms")]
    pub bucket_50_100ms: u64,
    /// 100ms+ bucket
    #[serde(rename = "100ms+")]
    pub bucket_100ms_plus: u64,
}

impl LatencyHistogram {
    /// Add a sample to the appropriate bucket
    ///
    /// # Arguments
    ///
    /// * `latency_us` - Latency in microseconds
    pub fn add_sample(&mut self, latency_us: f64) {
        match latency_us {
            l if l < 1000.0 => self.bucket_0_1ms += 1,
            l if l < 5000.0 => self.bucket_1_5ms += 1,
            l if l < 10000.0 => self.bucket_5_10ms += 1,
            l if l < 50000.0 => self.bucket_10_50ms += 1,
            l if l < 100000.0 => self.bucket_50_100ms += 1,
            _ => self.bucket_100ms_plus += 1,
        }
    }

    /// Get total count across all buckets
    pub fn total_count(&self) -> u64 {
        self.bucket_0_1ms
            + self.bucket_1_5ms
            + self.bucket_5_10ms
            + self.bucket_10_50ms
            + self.bucket_50_100ms
            + self.bucket_100ms_plus
    }
}

/// Latency percentiles
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Percentiles {
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// 99.9th percentile
    pub p999: f64,
}

/// Sub-buckets per power of two; bounds the relative error to 1/64
const SUB_BUCKETS: u64 = 64;
const SUB_BUCKET_BITS: u32 = 6;
/// Exact buckets below `SUB_BUCKETS`, then one group per remaining bit
const DISTRIBUTION_BUCKETS: usize = (SUB_BUCKETS + (64 - SUB_BUCKET_BITS as u64) * SUB_BUCKETS) as usize;

/// Fixed-size RTT distribution in microseconds
///
/// Values below 64us are counted exactly; larger values land in
/// log-linear buckets 1/64 of their power of two wide. Memory use does not
/// depend on the number of samples.
pub struct RttDistribution {
    counts: Box<[u64; DISTRIBUTION_BUCKETS]>,
    total: u64,
}

impl Default for RttDistribution {
    fn default() -> Self {
        Self {
            counts: Box::new([0; DISTRIBUTION_BUCKETS]),
            total: 0,
        }
    }
}

impl RttDistribution {
    fn index(value_us: u64) -> usize {
        if value_us < SUB_BUCKETS {
            return value_us as usize;
        }
        let msb = 63 - value_us.leading_zeros();
        let shift = msb - SUB_BUCKET_BITS;
        let mantissa = (value_us >> shift) - SUB_BUCKETS;
        (SUB_BUCKETS * (1 + u64::from(shift)) + mantissa) as usize
    }

    /// Smallest value mapping to bucket `index`
    fn lower_bound(index: usize) -> u64 {
        let index = index as u64;
        if index < SUB_BUCKETS {
            return index;
        }
        let shift = index / SUB_BUCKETS - 1;
        let mantissa = index % SUB_BUCKETS + SUB_BUCKETS;
        mantissa << shift
    }

    /// Count one sample
    pub fn record(&mut self, value_us: u64) {
        self.counts[Self::index(value_us)] += 1;
        self.total += 1;
    }

    pub fn count(&self) -> u64 {
        self.total
    }

    /// Number of buckets held, independent of the samples recorded
    pub fn bucket_count(&self) -> usize {
        self.counts.len()
    }

    /// Value at the given per-mille rank, rounded down to its bucket
    pub fn per_mille(&self, p: u64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let rank = std::cmp::min((self.total * p / 1000).saturating_sub(1), self.total - 1);
        let mut seen = 0;
        for (index, count) in self.counts.iter().enumerate() {
            seen += count;
            if seen > rank {
                return Self::lower_bound(index) as f64;
            }
        }
        0.0
    }

    pub fn percentiles(&self) -> Percentiles {
        Percentiles {
            p50: self.per_mille(500),
            p75: self.per_mille(750),
            p90: self.per_mille(900),
            p95: self.per_mille(950),
            p99: self.per_mille(990),
            p999: self.per_mille(999),
        }
    }
}
