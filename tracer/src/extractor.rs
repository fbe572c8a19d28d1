//! Frame classification
//!
//! Maps a raw captured frame to a begin/end event using fixed offsets from
//! the configuration. Every read is bounds checked against the captured
//! length; a frame too short for the configured layout is ignored.

use crate::config::{ByteOrder, FieldSpec, FrameLayout, RoleConfig, TracerConfig};
use anyhow::{Context, Result};
use rtt_common::{constants::*, ClassifiedEvent, CorrelationKey, Direction, Timestamp};
use std::net::Ipv4Addr;

/// Why a frame did not produce an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Neither role's address/port filters matched
    NoRoleMatch,
    /// A role matched but its payload marker did not
    MarkerMismatch,
    /// The frame ended before a configured offset
    Truncated,
}

/// Outcome of classifying one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ignored(IgnoreReason),
    Event(ClassifiedEvent),
}

/// Precomputed matcher for one role
#[derive(Debug, Clone)]
struct RoleMatcher {
    direction: Direction,
    dst_addr: Option<[u8; 4]>,
    src_addr: Option<[u8; 4]>,
    dst_port: Option<u16>,
    src_port: Option<u16>,
    marker: FieldSpec,
    marker_value: u64,
    key: [FieldSpec; 3],
}

fn addr_filter(addr: Option<Ipv4Addr>) -> Option<[u8; 4]> {
    addr.filter(|a| !a.is_unspecified()).map(|a| a.octets())
}

fn port_filter(port: Option<u16>) -> Option<u16> {
    port.filter(|p| *p != 0)
}

impl RoleMatcher {
    fn new(direction: Direction, role: &RoleConfig) -> Self {
        Self {
            direction,
            dst_addr: addr_filter(role.dst_addr),
            src_addr: addr_filter(role.src_addr),
            dst_port: port_filter(role.dst_port),
            src_port: port_filter(role.src_port),
            marker: role.marker.field(),
            marker_value: role.marker.value,
            key: role.key,
        }
    }

    /// Test the address/port filters
    ///
    /// `None` means a header field required by a non-wildcard filter lies
    /// beyond the captured frame.
    fn filters_match(&self, frame: &[u8], layout: &FrameLayout) -> Option<bool> {
        let net = layout.network_offset;
        let transport = layout.transport_offset;

        if let Some(port) = self.dst_port {
            if read_port(frame, transport + DST_PORT_OFFSET)? != port {
                return Some(false);
            }
        }
        if let Some(port) = self.src_port {
            if read_port(frame, transport + SRC_PORT_OFFSET)? != port {
                return Some(false);
            }
        }
        if let Some(addr) = self.dst_addr {
            if read_array::<4>(frame, net + IPV4_DST_ADDR_OFFSET)? != addr {
                return Some(false);
            }
        }
        if let Some(addr) = self.src_addr {
            if read_array::<4>(frame, net + IPV4_SRC_ADDR_OFFSET)? != addr {
                return Some(false);
            }
        }
        Some(true)
    }
}

/// Read a big-endian port number
fn read_port(frame: &[u8], offset: usize) -> Option<u16> {
    read_array::<2>(frame, offset).map(u16::from_be_bytes)
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    bytes.get(offset..end)?.try_into().ok()
}

/// Decode an unsigned field, zero-extended to 64 bits
fn read_field(payload: &[u8], field: FieldSpec, order: ByteOrder) -> Option<u64> {
    let width = usize::from(field.width);
    let end = field.offset.checked_add(width)?;
    let bytes = payload.get(field.offset..end)?;

    let mut buf = [0u8; 8];
    let value = match order {
        ByteOrder::Little => {
            buf[..width].copy_from_slice(bytes);
            u64::from_le_bytes(buf)
        }
        ByteOrder::Big => {
            buf[8 - width..].copy_from_slice(bytes);
            u64::from_be_bytes(buf)
        }
    };
    Some(value)
}

/// Classifies raw frames into begin/end events
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    layout: FrameLayout,
    byte_order: ByteOrder,
    begin: RoleMatcher,
    end: RoleMatcher,
}

impl FieldExtractor {
    /// Build an extractor from a configuration
    pub fn new(config: &TracerConfig) -> Result<Self> {
        config.validate().context("Cannot build field extractor")?;

        Ok(Self {
            layout: config.layout,
            byte_order: config.byte_order,
            begin: RoleMatcher::new(Direction::Begin, &config.begin),
            end: RoleMatcher::new(Direction::End, &config.end),
        })
    }

    /// Classify one captured frame
    ///
    /// The begin role is tested first. When its filters match, the frame is
    /// decided by the begin marker alone and never considered as an end.
    pub fn classify(&self, timestamp: Timestamp, frame: &[u8]) -> Classification {
        for role in [&self.begin, &self.end] {
            match role.filters_match(frame, &self.layout) {
                None => return Classification::Ignored(IgnoreReason::Truncated),
                Some(false) => continue,
                Some(true) => return self.extract(role, timestamp, frame),
            }
        }
        Classification::Ignored(IgnoreReason::NoRoleMatch)
    }

    fn extract(&self, role: &RoleMatcher, timestamp: Timestamp, frame: &[u8]) -> Classification {
        let Some(payload) = frame.get(self.layout.payload_offset..) else {
            return Classification::Ignored(IgnoreReason::Truncated);
        };

        match read_field(payload, role.marker, self.byte_order) {
            None => return Classification::Ignored(IgnoreReason::Truncated),
            Some(v) if v != role.marker_value => {
                return Classification::Ignored(IgnoreReason::MarkerMismatch)
            }
            Some(_) => {}
        }

        let mut key = CorrelationKey::default();
        for (slot, field) in key.0.iter_mut().zip(role.key) {
            match read_field(payload, field, self.byte_order) {
                Some(v) => *slot = v,
                None => return Classification::Ignored(IgnoreReason::Truncated),
            }
        }

        Classification::Event(ClassifiedEvent {
            timestamp,
            key,
            direction: role.direction,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::MarkerSpec;

    /// Build an Ethernet/IPv4/UDP frame around `payload` using the default layout
    pub(crate) fn udp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; DEFAULT_PAYLOAD_OFFSET];
        frame[12] = 0x08; // ethertype IPv4
        frame[DEFAULT_NETWORK_OFFSET] = 0x45;
        frame[DEFAULT_NETWORK_OFFSET + 9] = 17;
        frame[DEFAULT_NETWORK_OFFSET + IPV4_SRC_ADDR_OFFSET..][..4].copy_from_slice(&src);
        frame[DEFAULT_NETWORK_OFFSET + IPV4_DST_ADDR_OFFSET..][..4].copy_from_slice(&dst);
        frame[DEFAULT_TRANSPORT_OFFSET..][..2].copy_from_slice(&sport.to_be_bytes());
        frame[DEFAULT_TRANSPORT_OFFSET + 2..][..2].copy_from_slice(&dport.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Payload: 1-byte marker at 0, key fields at 1 (u64), 9 (u32), 13 (u32), little-endian
    pub(crate) fn payload(marker: u8, key: (u64, u32, u32)) -> Vec<u8> {
        let mut p = vec![marker];
        p.extend_from_slice(&key.0.to_le_bytes());
        p.extend_from_slice(&key.1.to_le_bytes());
        p.extend_from_slice(&key.2.to_le_bytes());
        p
    }

    /// Begin: to 232.0.0.1:10000, marker 10; End: from port 10001, marker 11
    pub(crate) fn test_config() -> TracerConfig {
        let key = [FieldSpec::new(1, 8), FieldSpec::new(9, 4), FieldSpec::new(13, 4)];
        TracerConfig {
            begin: RoleConfig {
                dst_addr: Some(Ipv4Addr::new(232, 0, 0, 1)),
                dst_port: Some(10000),
                marker: MarkerSpec { offset: 0, width: 1, value: 10 },
                key,
                ..RoleConfig::any()
            },
            end: RoleConfig {
                src_port: Some(10001),
                marker: MarkerSpec { offset: 0, width: 1, value: 11 },
                key,
                ..RoleConfig::any()
            },
            ..TracerConfig::default()
        }
    }

    const CLIENT: [u8; 4] = [10, 0, 0, 2];
    const GROUP: [u8; 4] = [232, 0, 0, 1];

    #[test]
    fn test_classify_begin() {
        let extractor = FieldExtractor::new(&test_config()).unwrap();
        let ts = Timestamp::new(100, 5);
        let frame = udp_frame(CLIENT, GROUP, 4000, 10000, &payload(10, (5, 7, 9)));

        assert_eq!(
            extractor.classify(ts, &frame),
            Classification::Event(ClassifiedEvent::begin(ts, CorrelationKey::new(5, 7, 9)))
        );
    }

    #[test]
    fn test_classify_end() {
        let extractor = FieldExtractor::new(&test_config()).unwrap();
        let ts = Timestamp::new(100, 5);
        let frame = udp_frame(GROUP, CLIENT, 10001, 4000, &payload(11, (u64::MAX, 1, 2)));

        assert_eq!(
            extractor.classify(ts, &frame),
            Classification::Event(ClassifiedEvent::end(ts, CorrelationKey::new(u64::MAX, 1, 2)))
        );
    }

    #[test]
    fn test_begin_marker_mismatch_does_not_fall_through() {
        let extractor = FieldExtractor::new(&test_config()).unwrap();
        // Matches both role filters, carries the end marker
        let frame = udp_frame(CLIENT, GROUP, 10001, 10000, &payload(11, (1, 1, 1)));

        assert_eq!(
            extractor.classify(Timestamp::default(), &frame),
            Classification::Ignored(IgnoreReason::MarkerMismatch)
        );
    }

    #[test]
    fn test_no_role_match() {
        let extractor = FieldExtractor::new(&test_config()).unwrap();
        let frame = udp_frame(CLIENT, [232, 0, 0, 2], 4000, 10000, &payload(10, (1, 1, 1)));

        assert_eq!(
            extractor.classify(Timestamp::default(), &frame),
            Classification::Ignored(IgnoreReason::NoRoleMatch)
        );
    }

    #[test]
    fn test_short_frames_are_ignored() {
        let extractor = FieldExtractor::new(&test_config()).unwrap();
        let full = udp_frame(CLIENT, GROUP, 4000, 10000, &payload(10, (5, 7, 9)));

        // Every truncation point must be handled without panicking
        for len in 0..full.len() {
            assert_eq!(
                extractor.classify(Timestamp::default(), &full[..len]),
                Classification::Ignored(IgnoreReason::Truncated),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_wildcard_filters_match_anything() {
        let mut config = test_config();
        config.begin = RoleConfig {
            dst_addr: Some(Ipv4Addr::UNSPECIFIED),
            dst_port: Some(0),
            ..config.begin
        };
        let extractor = FieldExtractor::new(&config).unwrap();
        let frame = udp_frame([1, 2, 3, 4], [5, 6, 7, 8], 1, 2, &payload(10, (3, 2, 1)));

        assert!(matches!(
            extractor.classify(Timestamp::default(), &frame),
            Classification::Event(ClassifiedEvent { direction: Direction::Begin, .. })
        ));
    }

    #[test]
    fn test_big_endian_fields() {
        let mut config = test_config();
        config.byte_order = ByteOrder::Big;
        config.begin.key = [FieldSpec::new(1, 2), FieldSpec::new(3, 1), FieldSpec::new(4, 4)];
        let extractor = FieldExtractor::new(&config).unwrap();
        let frame = udp_frame(CLIENT, GROUP, 4000, 10000, &[10, 0x01, 0x02, 0x03, 0, 0, 0x01, 0x00]);

        assert_eq!(
            extractor.classify(Timestamp::default(), &frame),
            Classification::Event(ClassifiedEvent::begin(
                Timestamp::default(),
                CorrelationKey::new(0x0102, 0x03, 0x0100)
            ))
        );
    }

    #[test]
    fn test_overlapping_reference_layout() {
        // Reference layout: u32 marker at 1, key u64/u32/u32 all at offset 1
        let extractor = FieldExtractor::new(&TracerConfig::default()).unwrap();
        let mut body = vec![0u8; 9];
        body[1..9].copy_from_slice(&(0x0000_0001_0000_000Au64).to_le_bytes());
        let frame = udp_frame(CLIENT, GROUP, 4000, 10000, &body);

        assert_eq!(
            extractor.classify(Timestamp::default(), &frame),
            Classification::Event(ClassifiedEvent::begin(
                Timestamp::default(),
                CorrelationKey::new(0x0000_0001_0000_000A, 10, 10)
            ))
        );
    }
}
