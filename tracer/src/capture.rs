//! Packet sources and the capture producer
//!
//! The producer pulls frames from a [`PacketSource`], classifies them and
//! appends events to the pipeline's current batch. It owns the source for
//! its whole life; dropping the producer closes the capture.

use crate::{
    config::{RoleConfig, TracerConfig},
    extractor::{Classification, FieldExtractor, IgnoreReason},
    pipeline::Pipeline,
    types::{Direction, PipelineStats, Timestamp},
};
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::{collections::VecDeque, path::Path, sync::Arc, thread, time::Duration};

/// One step of a packet source
#[derive(Debug)]
pub enum SourceEvent<'a> {
    /// A captured frame with its capture timestamp
    Frame { timestamp: Timestamp, data: &'a [u8] },
    /// No frame arrived within the source's read timeout
    Timeout,
    /// The source is exhausted and will deliver no more frames
    Closed,
}

/// Delivers raw captured frames
pub trait PacketSource: Send {
    /// Block until the next frame, a read timeout, or end of input
    fn next_frame(&mut self) -> Result<SourceEvent<'_>>;

    /// Frames dropped below this process, if the source can tell
    fn dropped(&mut self) -> Option<u64> {
        None
    }
}

/// libpcap-backed source, live or from a capture file
pub struct PcapSource {
    capture: pcap::Capture<dyn pcap::Activated>,
    live: bool,
}

impl PcapSource {
    /// Open the configured interface and install the capture filter
    pub fn open_live(config: &TracerConfig) -> Result<Self> {
        let opts = &config.capture;
        let device = config.interface.0.as_str();
        info!("Opening capture on {}", device);

        let mut inactive = pcap::Capture::from_device(device)
            .with_context(|| format!("Could not create pcap handle for {}", device))?
            .promisc(opts.promiscuous)
            .snaplen(opts.snaplen)
            .timeout(opts.read_timeout_ms);
        if let Some(size) = opts.buffer_size {
            inactive = inactive.buffer_size(size);
        }
        let capture = inactive
            .open()
            .with_context(|| format!("Could not open capture on {}", device))?;

        let mut source = Self {
            capture: capture.into(),
            live: true,
        };
        source.install_filter(&capture_filter(config))?;
        Ok(source)
    }

    /// Replay a pcap file through the configured filter
    pub fn open_file(path: &Path, config: &TracerConfig) -> Result<Self> {
        info!("Reading frames from {:?}", path);
        let capture = pcap::Capture::from_file(path)
            .with_context(|| format!("Could not open capture file {:?}", path))?;

        let mut source = Self {
            capture: capture.into(),
            live: false,
        };
        source.install_filter(&capture_filter(config))?;
        Ok(source)
    }

    fn install_filter(&mut self, filter: &str) -> Result<()> {
        self.capture
            .filter(filter, true)
            .with_context(|| format!("Could not install filter {:?}", filter))?;
        info!("Capture filter: {}", filter);
        Ok(())
    }
}

impl PacketSource for PcapSource {
    fn next_frame(&mut self) -> Result<SourceEvent<'_>> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(SourceEvent::Frame {
                timestamp: Timestamp::new(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as u32),
                data: packet.data,
            }),
            Err(pcap::Error::TimeoutExpired) => Ok(SourceEvent::Timeout),
            Err(pcap::Error::NoMorePackets) => Ok(SourceEvent::Closed),
            Err(e) => Err(e).context("Capture failed"),
        }
    }

    fn dropped(&mut self) -> Option<u64> {
        if !self.live {
            return None;
        }
        self.capture
            .stats()
            .ok()
            .map(|s| u64::from(s.dropped) + u64::from(s.if_dropped))
    }
}

/// In-memory source replaying prepared frames
///
/// With `hold_open` the source keeps reporting timeouts after the last
/// frame instead of closing, like a live link gone quiet.
pub struct ReplaySource {
    frames: VecDeque<(Timestamp, Vec<u8>)>,
    current: Vec<u8>,
    hold_open: bool,
    idle_wait: Duration,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = (Timestamp, Vec<u8>)>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            current: Vec::new(),
            hold_open: false,
            idle_wait: Duration::from_millis(1),
        }
    }

    /// Keep reporting timeouts once the frames run out
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

impl PacketSource for ReplaySource {
    fn next_frame(&mut self) -> Result<SourceEvent<'_>> {
        match self.frames.pop_front() {
            Some((timestamp, data)) => {
                self.current = data;
                Ok(SourceEvent::Frame {
                    timestamp,
                    data: &self.current,
                })
            }
            None if self.hold_open => {
                thread::sleep(self.idle_wait);
                Ok(SourceEvent::Timeout)
            }
            None => Ok(SourceEvent::Closed),
        }
    }
}

/// BPF conjunction of one role's non-wildcard filters, `None` if it has none
fn role_filter(role: &RoleConfig) -> Option<String> {
    let mut terms = Vec::new();
    if let Some(addr) = role.dst_addr.filter(|a| !a.is_unspecified()) {
        terms.push(format!("dst host {}", addr));
    }
    if let Some(addr) = role.src_addr.filter(|a| !a.is_unspecified()) {
        terms.push(format!("src host {}", addr));
    }
    if let Some(port) = role.dst_port.filter(|p| *p != 0) {
        terms.push(format!("dst port {}", port));
    }
    if let Some(port) = role.src_port.filter(|p| *p != 0) {
        terms.push(format!("src port {}", port));
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" and "))
    }
}

/// Coarse BPF filter admitting every frame either role could match
pub fn coarse_filter(config: &TracerConfig) -> String {
    let (Some(begin), Some(end)) = (role_filter(&config.begin), role_filter(&config.end)) else {
        // A role without filters accepts any UDP frame
        return "udp".to_string();
    };
    if begin == end {
        format!("udp and ({})", begin)
    } else {
        format!("udp and (({}) or ({}))", begin, end)
    }
}

/// Explicit filter from the configuration, or the derived one
pub fn capture_filter(config: &TracerConfig) -> String {
    config
        .capture
        .filter
        .clone()
        .unwrap_or_else(|| coarse_filter(config))
}

/// Producer side of the pipeline
pub struct CaptureProducer<P: PacketSource> {
    source: P,
    extractor: FieldExtractor,
    pipeline: Arc<Pipeline>,
}

impl<P: PacketSource> CaptureProducer<P> {
    pub fn new(source: P, extractor: FieldExtractor, pipeline: Arc<Pipeline>) -> Self {
        Self {
            source,
            extractor,
            pipeline,
        }
    }

    /// Capture until stopped, the source closes, or the source fails
    ///
    /// Whatever the outcome, the partial batch is published and the
    /// consumer is told no more batches will follow.
    pub fn run(mut self) -> Result<()> {
        info!("Capture producer started");
        let result = self.capture_loop();

        if let Some(dropped) = self.source.dropped() {
            if dropped > 0 {
                warn!("Packet source dropped {} frames", dropped);
            }
        }
        self.pipeline.finish_producer();

        match &result {
            Ok(()) => info!("Capture producer stopped"),
            Err(e) => error!("Capture producer failed: {:#}", e),
        }
        result
    }

    fn capture_loop(&mut self) -> Result<()> {
        let stats = self.pipeline.stats();

        while !self.pipeline.is_stopping() {
            match self.source.next_frame()? {
                SourceEvent::Frame { timestamp, data } => {
                    PipelineStats::incr(&stats.frames_seen);
                    match self.extractor.classify(timestamp, data) {
                        Classification::Event(event) => {
                            match event.direction {
                                Direction::Begin => PipelineStats::incr(&stats.begin_events),
                                Direction::End => PipelineStats::incr(&stats.end_events),
                            }
                            self.pipeline.append(event);
                        }
                        Classification::Ignored(IgnoreReason::NoRoleMatch) => {
                            PipelineStats::incr(&stats.frames_unmatched)
                        }
                        Classification::Ignored(IgnoreReason::MarkerMismatch) => {
                            PipelineStats::incr(&stats.marker_mismatches)
                        }
                        Classification::Ignored(IgnoreReason::Truncated) => {
                            PipelineStats::incr(&stats.frames_truncated)
                        }
                    }
                }
                SourceEvent::Timeout => {}
                SourceEvent::Closed => {
                    info!("Packet source closed");
                    break;
                }
            }
        }
        Ok(())
    }
}
