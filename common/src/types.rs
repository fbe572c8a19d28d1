//! Shared data structures between the capture and correlation sides
//!
//! These are plain `Copy` values so they can be moved through batches
//! without allocation.

use core::fmt;

/// Number of fields in a correlation key
pub const KEY_FIELDS: usize = 3;

/// Microseconds per second
pub const MICROS_PER_SEC: u32 = 1_000_000;

/// Capture-time instant as reported by the packet source
///
/// Only monotonic with respect to the packet source's own clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub secs: i64,
    /// Sub-second component, always below [`MICROS_PER_SEC`]
    pub micros: u32,
}

impl Timestamp {
    /// Build a timestamp, carrying excess microseconds into seconds
    pub const fn new(secs: i64, micros: u32) -> Self {
        Self {
            secs: secs + (micros / MICROS_PER_SEC) as i64,
            micros: micros % MICROS_PER_SEC,
        }
    }

    /// Timestamp shifted forward by the given number of microseconds
    pub const fn add_micros(self, micros: u64) -> Self {
        let total = self.micros as u64 + micros;
        Self {
            secs: self.secs + (total / MICROS_PER_SEC as u64) as i64,
            micros: (total % MICROS_PER_SEC as u64) as u32,
        }
    }
}

/// Which half of a measured interval an event represents
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    Begin = 0,
    End = 1,
}

/// Application-defined correlation key
///
/// Each field is zero-extended from its configured width. Only equality
/// and hashing are meaningful.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CorrelationKey(pub [u64; KEY_FIELDS]);

impl CorrelationKey {
    pub const fn new(a: u64, b: u64, c: u64) -> Self {
        Self([a, b, c])
    }

    pub fn fields(&self) -> &[u64; KEY_FIELDS] {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{}, {}, {}", a, b, c)
    }
}

/// A frame classified as one half of a measured interval
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassifiedEvent {
    /// Capture timestamp of the frame
    pub timestamp: Timestamp,
    /// Key extracted from the payload
    pub key: CorrelationKey,
    /// Begin or end of the interval
    pub direction: Direction,
}

impl ClassifiedEvent {
    pub const fn begin(timestamp: Timestamp, key: CorrelationKey) -> Self {
        Self {
            timestamp,
            key,
            direction: Direction::Begin,
        }
    }

    pub const fn end(timestamp: Timestamp, key: CorrelationKey) -> Self {
        Self {
            timestamp,
            key,
            direction: Direction::End,
        }
    }
}

// Events are copied into batches by value; keep them small
const _: () = {
    assert!(core::mem::size_of::<ClassifiedEvent>() <= 48);
};

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_timestamp_normalizes_micros() {
        let ts = Timestamp::new(10, 2_500_000);
        assert_eq!(ts, Timestamp { secs: 12, micros: 500_000 });
    }

    #[test]
    fn test_add_micros_carries() {
        let ts = Timestamp::new(1, 999_000).add_micros(2_000);
        assert_eq!(ts, Timestamp { secs: 2, micros: 1_000 });
    }

    #[test]
    fn test_key_display() {
        assert_eq!(CorrelationKey::new(5, 7, 9).to_string(), "5, 7, 9");
    }
}
