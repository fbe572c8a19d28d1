//! Defaults shared by the configuration layer and the pipeline
//!
//! The values describe the reference deployment: UDP multicast over
//! Ethernet + IPv4 without options.

// ============================================================================
// Frame Layout
// ============================================================================

/// Ethernet II header length
pub const ETHERNET_HEADER_LEN: usize = 14;

/// IPv4 header length without options
pub const IPV4_HEADER_LEN: usize = 20;

/// UDP header length
pub const UDP_HEADER_LEN: usize = 8;

/// Offset of the IPv4 header within a captured frame
pub const DEFAULT_NETWORK_OFFSET: usize = ETHERNET_HEADER_LEN;

/// Offset of the UDP header within a captured frame
pub const DEFAULT_TRANSPORT_OFFSET: usize = DEFAULT_NETWORK_OFFSET + IPV4_HEADER_LEN;

/// Offset of the UDP payload within a captured frame
pub const DEFAULT_PAYLOAD_OFFSET: usize = DEFAULT_TRANSPORT_OFFSET + UDP_HEADER_LEN;

/// IPv4 source address offset relative to the IPv4 header
pub const IPV4_SRC_ADDR_OFFSET: usize = 12;

/// IPv4 destination address offset relative to the IPv4 header
pub const IPV4_DST_ADDR_OFFSET: usize = 16;

/// Source port offset relative to the transport header
pub const SRC_PORT_OFFSET: usize = 0;

/// Destination port offset relative to the transport header
pub const DST_PORT_OFFSET: usize = 2;

// ============================================================================
// Matching Rules
// ============================================================================

/// Default multicast group the measured traffic is sent to
pub const DEFAULT_DST_ADDR: [u8; 4] = [232, 0, 0, 1];

/// Default destination port of the measured traffic
pub const DEFAULT_DST_PORT: u16 = 10000;

/// Default payload offset of the packet-type marker
pub const DEFAULT_MARKER_OFFSET: usize = 1;

/// Default width of the packet-type marker in bytes
pub const DEFAULT_MARKER_WIDTH: u8 = 4;

/// Default expected marker value
pub const DEFAULT_MARKER_VALUE: u64 = 10;

/// Default key field offsets within the payload
pub const DEFAULT_KEY_OFFSETS: [usize; 3] = [1, 1, 1];

/// Default key field widths in bytes
pub const DEFAULT_KEY_WIDTHS: [u8; 3] = [8, 4, 4];

// ============================================================================
// Correlation
// ============================================================================

/// Noise threshold, seconds part
pub const DEFAULT_THRESHOLD_SECS: i64 = 0;

/// Noise threshold, microseconds part
pub const DEFAULT_THRESHOLD_MICROS: u32 = 1000;

// ============================================================================
// Batching
// ============================================================================

/// Events per batch before it is handed to the consumer
pub const DEFAULT_BATCH_CAPACITY: usize = 10_000;

/// Consecutive empty polls before the producer's partial batch is flushed
pub const DEFAULT_IDLE_POLLS: u32 = 20;

/// Consumer poll interval while the queue is empty (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Capture
// ============================================================================

/// Default capture device
pub const DEFAULT_INTERFACE: &str = "eth0";

/// Maximum bytes captured per frame
pub const DEFAULT_SNAPLEN: i32 = 65535;

/// Packet source read timeout (milliseconds)
pub const DEFAULT_READ_TIMEOUT_MS: i32 = 1;
