//! Metrics exporters
//!
//! Writes the end-of-run report as JSON, Prometheus text or InfluxDB line
//! protocol.

use crate::types::RttMetrics;
use anyhow::{bail, Context, Result};
use std::{
    fmt::Write as _,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Trait for metrics exporters
pub trait MetricsExporter {
    /// Export metrics
    ///
    /// # Arguments
    ///
    /// * `metrics` - Aggregated metrics to export
    fn export(&self, metrics: &RttMetrics) -> Result<()>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// JSON format
    Json,
    /// Prometheus format
    Prometheus,
    /// InfluxDB line protocol
    Influx,
}

impl FromStr for ExporterType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "prometheus" | "prom" => Ok(Self::Prometheus),
            "influx" | "influxdb" => Ok(Self::Influx),
            _ => bail!("Unsupported format: {}. Use json, prometheus, or influx", s),
        }
    }
}

impl ExporterType {
    /// Build the exporter for this format writing to `output_path`
    pub fn exporter(self, output_path: PathBuf) -> Box<dyn MetricsExporter> {
        match self {
            Self::Json => Box::new(JsonExporter::new(output_path, true)),
            Self::Prometheus => Box::new(PrometheusExporter::new(output_path)),
            Self::Influx => Box::new(InfluxExporter::new(output_path, "rtt_trace".to_string())),
        }
    }
}

fn write_file(path: &Path, data: &str) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;

    file.write_all(data.as_bytes())
        .with_context(|| format!("Failed to write to output file: {:?}", path))?;

    Ok(())
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, metrics: &RttMetrics) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(metrics)?
        } else {
            serde_json::to_string(metrics)?
        };

        write_file(&self.output_path, &json)
    }
}

/// Prometheus exporter
pub struct PrometheusExporter {
    output_path: PathBuf,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Convert metrics to Prometheus format
    fn to_prometheus_format(metrics: &RttMetrics) -> String {
        let mut output = String::new();
        let mut metric = |name: &str, kind: &str, help: &str, samples: &[(&str, String)]| {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} {}", name, kind);
            for (labels, value) in samples {
                let _ = writeln!(output, "{}{} {}", name, labels, value);
            }
            output.push('\n');
        };

        metric(
            "rtt_trace_samples_total",
            "counter",
            "Total number of reported RTT samples",
            &[("", metrics.total_samples.to_string())],
        );
        metric(
            "rtt_trace_duration_seconds",
            "gauge",
            "Duration of collection period",
            &[("", metrics.duration_seconds.to_string())],
        );

        let p = &metrics.percentiles;
        metric(
            "rtt_trace_rtt_microseconds",
            "gauge",
            "RTT percentiles in microseconds",
            &[
                ("{percentile=\"0.50\"}", p.p50.to_string()),
                ("{percentile=\"0.75\"}", p.p75.to_string()),
                ("{percentile=\"0.90\"}", p.p90.to_string()),
                ("{percentile=\"0.95\"}", p.p95.to_string()),
                ("{percentile=\"0.99\"}", p.p99.to_string()),
                ("{percentile=\"0.999\"}", p.p999.to_string()),
            ],
        );

        let h = &metrics.histogram;
        metric(
            "rtt_trace_histogram_bucket",
            "gauge",
            "RTT histogram buckets",
            &[
                ("{le=\"1000\"}", h.bucket_0_1ms.to_string()),
                ("{le=\"5000\"}", h.bucket_1_5ms.to_string()),
                ("{le=\"10000\"}", h.bucket_5_10ms.to_string()),
                ("{le=\"50000\"}", h.bucket_10_50ms.to_string()),
                ("{le=\"100000\"}", h.bucket_50_100ms.to_string()),
                ("{le=\"+Inf\"}", h.bucket_100ms_plus.to_string()),
            ],
        );

        let c = &metrics.pipeline;
        metric(
            "rtt_trace_frames_total",
            "counter",
            "Captured frames by classification outcome",
            &[
                ("{outcome=\"begin\"}", c.begin_events.to_string()),
                ("{outcome=\"end\"}", c.end_events.to_string()),
                ("{outcome=\"unmatched\"}", c.frames_unmatched.to_string()),
                ("{outcome=\"marker_mismatch\"}", c.marker_mismatches.to_string()),
                ("{outcome=\"truncated\"}", c.frames_truncated.to_string()),
            ],
        );
        metric(
            "rtt_trace_dropped_matches_total",
            "counter",
            "Correlation outcomes that produced no record",
            &[
                ("{reason=\"unmatched_end\"}", c.unmatched_ends.to_string()),
                ("{reason=\"overwritten_begin\"}", c.begins_overwritten.to_string()),
                ("{reason=\"clock_anomaly\"}", c.clock_anomalies.to_string()),
                ("{reason=\"below_threshold\"}", c.below_threshold.to_string()),
            ],
        );
        metric(
            "rtt_trace_batches_total",
            "counter",
            "Batches handed to the correlation thread",
            &[
                ("{kind=\"published\"}", c.batches_published.to_string()),
                ("{kind=\"idle_flush\"}", c.flushes_forced.to_string()),
                ("{kind=\"idle_flush_skipped\"}", c.flushes_skipped.to_string()),
            ],
        );

        output
    }
}

impl MetricsExporter for PrometheusExporter {
    fn export(&self, metrics: &RttMetrics) -> Result<()> {
        write_file(&self.output_path, &Self::to_prometheus_format(metrics))
    }
}

/// InfluxDB line protocol exporter
pub struct InfluxExporter {
    output_path: PathBuf,
    measurement: String,
}

impl InfluxExporter {
    /// Create a new InfluxDB exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `measurement` - Measurement name for InfluxDB
    pub fn new(output_path: PathBuf, measurement: String) -> Self {
        Self {
            output_path,
            measurement,
        }
    }

    /// Convert metrics to InfluxDB line protocol
    fn to_influx_format(metrics: &RttMetrics, measurement: &str) -> String {
        let mut output = String::new();
        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);

        let _ = writeln!(
            output,
            "{},type=summary total_samples={}i,duration_seconds={}i,min_us={},max_us={},avg_us={},std_dev_us={} {}",
            measurement,
            metrics.total_samples,
            metrics.duration_seconds,
            metrics.min_rtt_us,
            metrics.max_rtt_us,
            metrics.avg_rtt_us,
            metrics.std_dev_us,
            timestamp
        );

        let p = &metrics.percentiles;
        let _ = writeln!(
            output,
            "{},type=percentiles p50={},p75={},p90={},p95={},p99={},p999={} {}",
            measurement, p.p50, p.p75, p.p90, p.p95, p.p99, p.p999, timestamp
        );

        let h = &metrics.histogram;
        let _ = writeln!(
            output,
            "{},type=histogram bucket_0_1ms={}i,bucket_1_5ms={}i,bucket_5_10ms={}i,bucket_10_50ms={}i,bucket_50_100ms={}i,bucket_100ms_plus={}i {}",
            measurement,
            h.bucket_0_1ms,
            h.bucket_1_5ms,
            h.bucket_5_10ms,
            h.bucket_10_50ms,
            h.bucket_50_100ms,
            h.bucket_100ms_plus,
            timestamp
        );

        let c = &metrics.pipeline;
        let _ = writeln!(
            output,
            "{},type=pipeline frames_seen={}i,begin_events={}i,end_events={}i,unmatched_ends={}i,begins_overwritten={}i,clock_anomalies={}i,below_threshold={}i,batches_published={}i,flushes_forced={}i {}",
            measurement,
            c.frames_seen,
            c.begin_events,
            c.end_events,
            c.unmatched_ends,
            c.begins_overwritten,
            c.clock_anomalies,
            c.below_threshold,
            c.batches_published,
            c.flushes_forced,
            timestamp
        );

        output
    }
}

impl MetricsExporter for InfluxExporter {
    fn export(&self, metrics: &RttMetrics) -> Result<()> {
        write_file(&self.output_path, &Self::to_influx_format(metrics, &self.measurement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn create_test_metrics() -> RttMetrics {
        RttMetrics {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            duration_seconds: 60,
            total_samples: 1000,
            min_rtt_us: 1000.0,
            max_rtt_us: 9000.0,
            avg_rtt_us: 2500.0,
            std_dev_us: 10.0,
            histogram: LatencyHistogram::default(),
            percentiles: Percentiles {
                p50: 100.0,
                p75: 200.0,
                p90: 300.0,
                p95: 400.0,
                p99: 500.0,
                p999: 600.0,
            },
            pipeline: PipelineCounters {
                unmatched_ends: 3,
                ..PipelineCounters::default()
            },
        }
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = create_test_metrics();
        let prometheus = PrometheusExporter::to_prometheus_format(&metrics);

        assert!(prometheus.contains("rtt_trace_samples_total 1000"));
        assert!(prometheus.contains("rtt_trace_duration_seconds 60"));
        assert!(prometheus.contains("rtt_trace_rtt_microseconds{percentile=\"0.50\"} 100"));
        assert!(prometheus.contains("rtt_trace_dropped_matches_total{reason=\"unmatched_end\"} 3"));
    }

    #[test]
    fn test_influx_format() {
        let metrics = create_test_metrics();
        let influx = InfluxExporter::to_influx_format(&metrics, "rtt");

        assert!(influx.contains("rtt,type=summary"));
        assert!(influx.contains("total_samples=1000i"));
        assert!(influx.contains("p50=100"));
        assert!(influx.contains("unmatched_ends=3i"));
    }

    #[test]
    fn test_exporter_type_parsing() {
        assert_eq!("JSON".parse::<ExporterType>().unwrap(), ExporterType::Json);
        assert_eq!("prom".parse::<ExporterType>().unwrap(), ExporterType::Prometheus);
        assert_eq!("influxdb".parse::<ExporterType>().unwrap(), ExporterType::Influx);
        assert!("csv".parse::<ExporterType>().is_err());
    }

    #[test]
    fn test_json_export_writes_file() {
        let path = std::env::temp_dir().join(format!("rtt-trace-export-{}.json", std::process::id()));
        JsonExporter::new(path.clone(), false)
            .export(&create_test_metrics())
            .unwrap();

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(written["total_samples"], 1000);
        assert_eq!(written["histogram"]["0-1ms"], 0);
    }
}
