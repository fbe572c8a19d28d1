//! Passive RTT tracer library
//!
//! Captures frames, classifies them into begin/end events, moves them in
//! batches to a correlation thread and reports the elapsed time between
//! matching pairs.

pub mod batch;
pub mod capture;
pub mod collector;
pub mod config;
pub mod correlate;
pub mod exporter;
pub mod extractor;
pub mod idle;
pub mod pipeline;
pub mod runtime;
pub mod sink;
pub mod types;

pub use capture::{PacketSource, PcapSource, ReplaySource};
pub use collector::{MetricsCollector, SharedCollector};
pub use config::TracerConfig;
pub use correlate::CorrelationEngine;
pub use exporter::{ExporterType, JsonExporter, MetricsExporter};
pub use extractor::FieldExtractor;
pub use pipeline::Pipeline;
pub use runtime::{TraceReport, TracerHandle};
pub use sink::{FanOut, LineSink, RttSink};
pub use types::*;
