//! Result sinks
//!
//! Receive every reported [`RttRecord`]. The line format is
//!
//! ```text
//! Time = [2024-05-01_09:30:00.000123], rtt = [2000us], key = [5, 7, 9]
//! ```
//!
//! with the timestamp in local time and `<s>s` prefixed to the rtt when it
//! is at least one second.

use crate::types::{RttRecord, Timestamp};
use chrono::{Local, TimeZone};
use log::warn;
use std::io::Write;

/// Consumer of reported RTT records
pub trait RttSink {
    fn emit(&mut self, record: &RttRecord);
}

/// Format a capture timestamp as `YYYY-MM-DD_HH:MM:SS.uuuuuu` in `tz`
pub fn format_timestamp<Tz: TimeZone>(ts: Timestamp, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match tz.timestamp_opt(ts.secs, ts.micros * 1000).single() {
        Some(dt) => dt.format("%Y-%m-%d_%H:%M:%S%.6f").to_string(),
        None => format!("{}.{:06}", ts.secs, ts.micros),
    }
}

/// Render one result line in `tz`
pub fn format_record_in<Tz: TimeZone>(record: &RttRecord, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "Time = [{:<26}], rtt = [{}], key = [{}]",
        format_timestamp(record.begin, tz),
        record.elapsed,
        record.key
    )
}

/// Render one result line in local time
pub fn format_record(record: &RttRecord) -> String {
    format_record_in(record, &Local)
}

/// Writes one formatted line per record
pub struct LineSink<W: Write> {
    writer: W,
    failed: bool,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            failed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl LineSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> RttSink for LineSink<W> {
    fn emit(&mut self, record: &RttRecord) {
        if let Err(e) = writeln!(self.writer, "{}", format_record(record)) {
            // Report the first failure only; a closed stdout would repeat per record
            if !self.failed {
                warn!("Failed to write RTT record: {}", e);
                self.failed = true;
            }
        }
    }
}

/// Forwards every record to each inner sink in order
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn RttSink + Send>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl RttSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl RttSink for FanOut {
    fn emit(&mut self, record: &RttRecord) {
        for sink in &mut self.sinks {
            sink.emit(record);
        }
    }
}

impl RttSink for Vec<RttRecord> {
    fn emit(&mut self, record: &RttRecord) {
        self.push(*record);
    }
}

impl<S: RttSink + ?Sized> RttSink for Box<S> {
    fn emit(&mut self, record: &RttRecord) {
        (**self).emit(record);
    }
}
