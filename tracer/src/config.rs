//! Runtime configuration
//!
//! Loaded from a JSON file. Every section has defaults describing the
//! reference deployment, so `{}` is a valid configuration.

use anyhow::{bail, Context, Result};
use rtt_common::constants::*;
use rtt_common::MICROS_PER_SEC;
use serde::{Deserialize, Serialize};
use std::{net::Ipv4Addr, path::Path, time::Duration};

/// Top-level tracer configuration
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct TracerConfig {
    /// Capture device name
    pub interface: InterfaceName,
    /// Packet source options
    pub capture: CaptureConfig,
    /// Header offsets within a captured frame
    pub layout: FrameLayout,
    /// Byte order of multi-byte payload fields
    pub byte_order: ByteOrder,
    /// Matching rule for begin packets
    pub begin: RoleConfig,
    /// Matching rule for end packets
    pub end: RoleConfig,
    /// Minimum elapsed time worth reporting
    pub threshold: ThresholdConfig,
    /// Batch hand-off tuning
    pub batch: BatchConfig,
}

/// Capture device name, defaulting to the reference interface
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct InterfaceName(pub String);

impl Default for InterfaceName {
    fn default() -> Self {
        Self(DEFAULT_INTERFACE.to_string())
    }
}

/// Packet source options
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    pub snaplen: i32,
    pub promiscuous: bool,
    /// Read timeout; bounds how long shutdown waits on an idle link
    pub read_timeout_ms: i32,
    /// Kernel capture buffer size in bytes
    pub buffer_size: Option<i32>,
    /// Explicit BPF filter, replacing the one derived from the role filters
    pub filter: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: true,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            buffer_size: None,
            filter: None,
        }
    }
}

/// Fixed header offsets within a captured frame
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct FrameLayout {
    /// Start of the IPv4 header
    pub network_offset: usize,
    /// Start of the UDP header
    pub transport_offset: usize,
    /// Start of the application payload
    pub payload_offset: usize,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            network_offset: DEFAULT_NETWORK_OFFSET,
            transport_offset: DEFAULT_TRANSPORT_OFFSET,
            payload_offset: DEFAULT_PAYLOAD_OFFSET,
        }
    }
}

/// Byte order used to decode marker and key fields
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// A fixed-width unsigned field within the payload
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Offset relative to the payload start
    pub offset: usize,
    /// Width in bytes: 1, 2, 4 or 8
    pub width: u8,
}

impl FieldSpec {
    pub const fn new(offset: usize, width: u8) -> Self {
        Self { offset, width }
    }

    fn validate(&self, what: &str) -> Result<()> {
        if !matches!(self.width, 1 | 2 | 4 | 8) {
            bail!("{}: width must be 1, 2, 4 or 8 bytes, got {}", what, self.width);
        }
        Ok(())
    }
}

/// Payload marker identifying the packet type
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerSpec {
    pub offset: usize,
    pub width: u8,
    /// Expected value after decoding with the configured byte order
    pub value: u64,
}

impl Default for MarkerSpec {
    fn default() -> Self {
        Self {
            offset: DEFAULT_MARKER_OFFSET,
            width: DEFAULT_MARKER_WIDTH,
            value: DEFAULT_MARKER_VALUE,
        }
    }
}

impl MarkerSpec {
    pub fn field(&self) -> FieldSpec {
        FieldSpec::new(self.offset, self.width)
    }
}

/// Address/port filters, marker and key layout for one role
///
/// A filter left unset, `0.0.0.0` or port `0` matches anything.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RoleConfig {
    pub dst_addr: Option<Ipv4Addr>,
    pub src_addr: Option<Ipv4Addr>,
    pub dst_port: Option<u16>,
    pub src_port: Option<u16>,
    pub marker: MarkerSpec,
    pub key: [FieldSpec; 3],
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            dst_addr: Some(Ipv4Addr::from(DEFAULT_DST_ADDR)),
            src_addr: None,
            dst_port: Some(DEFAULT_DST_PORT),
            src_port: None,
            marker: MarkerSpec::default(),
            key: [0, 1, 2].map(|i| FieldSpec::new(DEFAULT_KEY_OFFSETS[i], DEFAULT_KEY_WIDTHS[i])),
        }
    }
}

impl RoleConfig {
    /// Role with every address/port filter set to wildcard
    pub fn any() -> Self {
        Self {
            dst_addr: None,
            src_addr: None,
            dst_port: None,
            src_port: None,
            ..Self::default()
        }
    }

    fn validate(&self, role: &str) -> Result<()> {
        let marker = self.marker.field();
        marker.validate(&format!("{} marker", role))?;
        if marker.width < 8 && self.marker.value >> (u32::from(marker.width) * 8) != 0 {
            bail!(
                "{} marker: value {} does not fit in {} bytes",
                role,
                self.marker.value,
                marker.width
            );
        }
        for (i, field) in self.key.iter().enumerate() {
            field.validate(&format!("{} key field {}", role, i + 1))?;
        }
        Ok(())
    }
}

/// Noise threshold: matches faster than this are not reported
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub secs: i64,
    pub micros: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            secs: DEFAULT_THRESHOLD_SECS,
            micros: DEFAULT_THRESHOLD_MICROS,
        }
    }
}

/// Batch hand-off tuning
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Events per batch
    pub capacity: usize,
    /// Consecutive empty polls before a forced flush
    pub idle_polls: u32,
    /// Consumer wait per empty poll
    pub poll_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BATCH_CAPACITY,
            idle_polls: DEFAULT_IDLE_POLLS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl BatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl TracerConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_json(&contents)
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TracerConfig = serde_json::from_str(json).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        let layout = &self.layout;
        if layout.transport_offset < layout.network_offset || layout.payload_offset < layout.transport_offset {
            bail!(
                "layout offsets must be non-decreasing: network {}, transport {}, payload {}",
                layout.network_offset,
                layout.transport_offset,
                layout.payload_offset
            );
        }
        self.begin.validate("begin")?;
        self.end.validate("end")?;
        if self.threshold.secs < 0 {
            bail!("threshold seconds must not be negative");
        }
        if self.threshold.micros >= MICROS_PER_SEC {
            bail!("threshold micros must be below {}", MICROS_PER_SEC);
        }
        if self.batch.capacity == 0 {
            bail!("batch capacity must be at least 1");
        }
        if self.batch.idle_polls == 0 {
            bail!("idle_polls must be at least 1");
        }
        if self.batch.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be at least 1");
        }
        Ok(())
    }
}
