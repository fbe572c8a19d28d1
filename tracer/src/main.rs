//! Passive RTT tracer
//!
//! Captures begin/end datagrams on an interface (or from a capture file),
//! prints one line per matched pair and exports an aggregate report.
//!
//! ## Usage
//!
//! ```bash
//! # Trace eth0 with the built-in defaults until Ctrl-C
//! sudo ./rtt-trace --duration 0
//!
//! # Use a layout file and report only RTTs of at least 5ms
//! sudo ./rtt-trace --config tracer.json --threshold-us 5000
//!
//! # Replay a capture file and export Prometheus text
//! ./rtt-trace --read-file trace.pcap --format prometheus --output rtt.prom
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};
use parking_lot::Mutex;
use rtt_common::MICROS_PER_SEC;
use rtt_tracer::{
    capture::PcapSource,
    collector::{MetricsCollector, SharedCollector},
    config::{InterfaceName, ThresholdConfig, TracerConfig},
    exporter::ExporterType,
    runtime::{self, TraceReport},
    sink::{FanOut, LineSink},
    types::RttMetrics,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    signal,
    time::{sleep, Instant},
};

/// Passive round-trip time tracer
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Capture interface, overrides the config file
    #[clap(short, long)]
    interface: Option<String>,

    /// Read frames from a pcap file instead of a live interface
    #[clap(short, long)]
    read_file: Option<PathBuf>,

    /// Duration to run the tracer (in seconds, 0 = until interrupted)
    #[clap(short, long, default_value_t = 0)]
    duration: u64,

    /// Output file for the metrics report
    #[clap(short, long, default_value = "rtt-metrics.json")]
    output: PathBuf,

    /// Output format (json, prometheus, influx)
    #[clap(short, long, default_value = "json")]
    format: String,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// Progress reporting interval in seconds
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,

    /// Noise threshold in microseconds, overrides the config file
    #[clap(long)]
    threshold_us: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    print_banner();

    let export_format: ExporterType = args.format.parse()?;
    let config = load_config(&args)?;

    info!("Starting RTT tracer...");
    match &args.read_file {
        Some(path) => info!("   Source: {:?}", path),
        None => info!("   Interface: {}", config.interface.0),
    }
    info!(
        "   Duration: {} seconds",
        if args.duration == 0 {
            "infinite".to_string()
        } else {
            args.duration.to_string()
        }
    );
    info!(
        "   Threshold: {}s {}us",
        config.threshold.secs, config.threshold.micros
    );
    info!("   Output: {:?}", args.output);
    info!("   Format: {}", args.format);

    let source = match &args.read_file {
        Some(path) => PcapSource::open_file(path, &config)?,
        None => PcapSource::open_live(&config)?,
    };

    let collector: SharedCollector = Arc::new(Mutex::new(MetricsCollector::new()));
    let sink = FanOut::new()
        .with(LineSink::stdout())
        .with(Arc::clone(&collector));

    let handle = runtime::start(&config, source, sink)?;
    let progress = runtime::spawn_progress_reporter(Arc::clone(handle.pipeline()), args.progress_interval);

    // Run for specified duration, until interrupted or until the source ends
    let start_time = Instant::now();
    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));

    tokio::select! {
        _ = async {
            match duration {
                Some(d) => sleep(d).await,
                None => std::future::pending().await,
            }
        } => {
            info!("Duration reached, shutting down...");
        }
        _ = signal::ctrl_c() => {
            info!("Interrupted, shutting down...");
        }
        _ = handle.capture_exited() => {
            info!("Capture finished, draining...");
        }
    }

    handle.shutdown();
    progress.abort();
    let report = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Tracer join task failed")??;

    let elapsed = start_time.elapsed().as_secs();

    info!("Generating metrics report...");
    let metrics = collector.lock().generate_metrics(elapsed, report.counters.clone());
    export_format.exporter(args.output.clone()).export(&metrics)?;
    info!("Metrics written to {:?}", args.output);

    print_summary(&metrics, &report);

    if let Some(e) = report.capture_error {
        error!("Capture failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}

/// Load the config file if given and apply command-line overrides
fn load_config(args: &Args) -> Result<TracerConfig> {
    let mut config = match &args.config {
        Some(path) => TracerConfig::load(path)?,
        None => TracerConfig::default(),
    };

    if let Some(interface) = &args.interface {
        config.interface = InterfaceName(interface.clone());
    }
    if let Some(us) = args.threshold_us {
        let secs = us / u64::from(MICROS_PER_SEC);
        if secs > i64::MAX as u64 {
            bail!("Threshold out of range: {}us", us);
        }
        config.threshold = ThresholdConfig {
            secs: secs as i64,
            micros: (us % u64::from(MICROS_PER_SEC)) as u32,
        };
    }

    config.validate()?;
    Ok(config)
}

fn print_banner() {
    println!(
        r#"
╔═══════════════════════════════════════════════════╗
║              Passive RTT Tracer                   ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}

fn print_summary(metrics: &RttMetrics, report: &TraceReport) {
    let c = &report.counters;

    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  RTT samples:        {}", metrics.total_samples);
    info!("  Duration:           {} seconds", metrics.duration_seconds);
    info!("  Pending at exit:    {}", report.correlation.pending_at_exit);
    info!("");
    info!("  RTT Percentiles (μs):");
    info!("    p50:  {:>10.2}", metrics.percentiles.p50);
    info!("    p75:  {:>10.2}", metrics.percentiles.p75);
    info!("    p90:  {:>10.2}", metrics.percentiles.p90);
    info!("    p95:  {:>10.2}", metrics.percentiles.p95);
    info!("    p99:  {:>10.2}", metrics.percentiles.p99);
    info!("    p999: {:>10.2}", metrics.percentiles.p999);
    info!("");
    info!("  Histogram:");
    info!("    0-1ms:       {:>8}", metrics.histogram.bucket_0_1ms);
    info!("    1-5ms:       {:>8}", metrics.histogram.bucket_1_5ms);
    info!("    5-10ms:      {:>8}", metrics.histogram.bucket_5_10ms);
    info!("    10-50ms:     {:>8}", metrics.histogram.bucket_10_50ms);
    info!("    50-100ms:    {:>8}", metrics.histogram.bucket_50_100ms);
    info!("    100ms+:      {:>8}", metrics.histogram.bucket_100ms_plus);
    info!("");
    info!("  Frames:");
    info!("    seen:             {:>8}", c.frames_seen);
    info!("    begin:            {:>8}", c.begin_events);
    info!("    end:              {:>8}", c.end_events);
    info!("    unmatched:        {:>8}", c.frames_unmatched);
    info!("    marker mismatch:  {:>8}", c.marker_mismatches);
    info!("    truncated:        {:>8}", c.frames_truncated);
    info!("");
    info!("  Correlation:");
    info!("    unmatched ends:   {:>8}", c.unmatched_ends);
    info!("    overwritten:      {:>8}", c.begins_overwritten);
    info!("    clock anomalies:  {:>8}", c.clock_anomalies);
    info!("    below threshold:  {:>8}", c.below_threshold);
    info!("    idle flushes:     {:>8}", c.flushes_forced);
    info!("");
    info!("============================================");
}
