//! Shared types and defaults for the rtt-trace pipeline
//!
//! This crate provides the event values passed between the capture and
//! correlation threads, and the defaults describing the reference deployment.

#![no_std]

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::{ClassifiedEvent, CorrelationKey, Direction, Timestamp, KEY_FIELDS, MICROS_PER_SEC};
