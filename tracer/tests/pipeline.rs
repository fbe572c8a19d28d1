//! End-to-end runs of the capture and correlation threads over replayed frames

use chrono::Utc;
use parking_lot::Mutex;
use rtt_tracer::{
    capture::ReplaySource,
    config::{FieldSpec, MarkerSpec, RoleConfig, ThresholdConfig, TracerConfig},
    runtime::{self, TraceReport},
    sink::{format_record_in, RttSink},
    types::{CorrelationKey, Elapsed, RttRecord, Timestamp},
};
use std::{
    net::Ipv4Addr,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

const T0: Timestamp = Timestamp { secs: 1_714_555_800, micros: 123 };
const CLIENT: [u8; 4] = [10, 0, 0, 2];
const GROUP: [u8; 4] = [232, 0, 0, 1];
const BEGIN_MARKER: u8 = 10;
const END_MARKER: u8 = 11;

/// Records shared with the test after the sink moves to the correlation thread
#[derive(Clone, Default)]
struct Recorded(Arc<Mutex<Vec<RttRecord>>>);

impl Recorded {
    fn records(&self) -> Vec<RttRecord> {
        self.0.lock().clone()
    }
}

impl RttSink for Recorded {
    fn emit(&mut self, record: &RttRecord) {
        self.0.lock().push(record.clone());
    }
}

/// Ethernet + IPv4 + UDP headers followed by `payload`
fn udp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 42];
    frame[12] = 0x08;
    frame[14] = 0x45;
    frame[23] = 17;
    frame[26..30].copy_from_slice(&src);
    frame[30..34].copy_from_slice(&dst);
    frame[34..36].copy_from_slice(&sport.to_be_bytes());
    frame[36..38].copy_from_slice(&dport.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn payload(marker: u8, key: (u64, u32, u32)) -> Vec<u8> {
    let mut p = vec![marker];
    p.extend_from_slice(&key.0.to_le_bytes());
    p.extend_from_slice(&key.1.to_le_bytes());
    p.extend_from_slice(&key.2.to_le_bytes());
    p
}

fn begin(ts: Timestamp, key: (u64, u32, u32)) -> (Timestamp, Vec<u8>) {
    (ts, udp_frame(CLIENT, GROUP, 4000, 10000, &payload(BEGIN_MARKER, key)))
}

fn end(ts: Timestamp, key: (u64, u32, u32)) -> (Timestamp, Vec<u8>) {
    (ts, udp_frame(GROUP, CLIENT, 10001, 4000, &payload(END_MARKER, key)))
}

fn config() -> TracerConfig {
    let key = [FieldSpec::new(1, 8), FieldSpec::new(9, 4), FieldSpec::new(13, 4)];
    TracerConfig {
        begin: RoleConfig {
            dst_addr: Some(Ipv4Addr::from(GROUP)),
            dst_port: Some(10000),
            marker: MarkerSpec { offset: 0, width: 1, value: u64::from(BEGIN_MARKER) },
            key,
            ..RoleConfig::any()
        },
        end: RoleConfig {
            src_port: Some(10001),
            marker: MarkerSpec { offset: 0, width: 1, value: u64::from(END_MARKER) },
            key,
            ..RoleConfig::any()
        },
        threshold: ThresholdConfig { secs: 0, micros: 1000 },
        ..TracerConfig::default()
    }
}

fn trace(config: &TracerConfig, frames: Vec<(Timestamp, Vec<u8>)>) -> (Vec<RttRecord>, TraceReport) {
    let sink = Recorded::default();
    let handle = runtime::start(config, ReplaySource::new(frames), sink.clone()).unwrap();
    let report = handle.join().unwrap();
    (sink.records(), report)
}

#[test]
fn test_begin_end_pair_reports_rtt() {
    let (records, report) = trace(&config(), vec![begin(T0, (5, 7, 9)), end(T0.add_micros(2000), (5, 7, 9))]);

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].begin, T0);
    assert_eq!(records[0].elapsed, Elapsed::new(0, 2000));
    assert_eq!(records[0].key, CorrelationKey::new(5, 7, 9));
    assert_eq!(
        format_record_in(&records[0], &Utc),
        "Time = [2024-05-01_09:30:00.000123], rtt = [2000us], key = [5, 7, 9]"
    );

    assert!(report.capture_error.is_none());
    assert_eq!(report.counters.begin_events, 1);
    assert_eq!(report.counters.end_events, 1);
    assert_eq!(report.counters.records_emitted, 1);
    assert_eq!(report.correlation.pending_at_exit, 0);
}

#[test]
fn test_end_alone_reports_nothing() {
    let (records, report) = trace(&config(), vec![end(T0.add_micros(2000), (5, 7, 9))]);

    assert!(records.is_empty());
    assert_eq!(report.counters.unmatched_ends, 1);
}

#[test]
fn test_below_threshold_is_consumed_silently() {
    let (records, report) = trace(
        &config(),
        vec![
            begin(T0, (1, 0, 0)),
            end(T0.add_micros(999), (1, 0, 0)),
            // Already consumed: a late duplicate end does not match
            end(T0.add_micros(5000), (1, 0, 0)),
        ],
    );

    assert!(records.is_empty());
    assert_eq!(report.counters.below_threshold, 1);
    assert_eq!(report.counters.unmatched_ends, 1);
}

#[test]
fn test_newest_begin_wins() {
    let mut config = config();
    config.threshold = ThresholdConfig { secs: 0, micros: 0 };
    let (records, report) = trace(
        &config,
        vec![
            begin(T0, (3, 3, 3)),
            begin(T0.add_micros(500), (3, 3, 3)),
            end(T0.add_micros(800), (3, 3, 3)),
        ],
    );

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].begin, T0.add_micros(500));
    assert_eq!(records[0].elapsed, Elapsed::new(0, 300));
    assert_eq!(report.counters.begins_overwritten, 1);
}

#[test]
fn test_unrelated_traffic_is_ignored() {
    let (records, report) = trace(
        &config(),
        vec![
            (T0, udp_frame(CLIENT, [10, 0, 0, 9], 4000, 53, &payload(BEGIN_MARKER, (1, 1, 1)))),
            (T0, udp_frame(CLIENT, GROUP, 4000, 10000, &payload(99, (1, 1, 1)))),
            (T0, udp_frame(CLIENT, GROUP, 4000, 10000, &[BEGIN_MARKER, 1, 2])),
            begin(T0, (8, 8, 8)),
            end(T0.add_micros(1500), (8, 8, 8)),
        ],
    );

    assert_eq!(records.len(), 1);
    assert_eq!(report.counters.frames_seen, 5);
    assert_eq!(report.counters.frames_unmatched, 1);
    assert_eq!(report.counters.marker_mismatches, 1);
    assert_eq!(report.counters.frames_truncated, 1);
}

#[test]
fn test_batches_rotate_and_keep_order() {
    let mut config = config();
    config.batch.capacity = 2;
    config.threshold = ThresholdConfig { secs: 0, micros: 0 };
    let (records, report) = trace(
        &config,
        vec![
            begin(T0, (1, 0, 0)),
            end(T0.add_micros(10), (1, 0, 0)),
            begin(T0.add_micros(20), (2, 0, 0)),
            end(T0.add_micros(50), (2, 0, 0)),
            begin(T0.add_micros(60), (3, 0, 0)),
        ],
    );

    let keys: Vec<_> = records.iter().map(|r| r.key.fields()[0]).collect();
    assert_eq!(keys, vec![1, 2]);
    assert_eq!(report.counters.batches_published, 3);
    assert_eq!(report.correlation.batches, 3);
    assert_eq!(report.correlation.pending_at_exit, 1);
}

#[test]
fn test_idle_flush_delivers_partial_batch() {
    let mut config = config();
    config.batch.capacity = 1000;
    config.batch.idle_polls = 3;
    config.batch.poll_interval_ms = 10;

    let sink = Recorded::default();
    let source = ReplaySource::new(vec![begin(T0, (5, 7, 9)), end(T0.add_micros(2000), (5, 7, 9))]).hold_open();
    let handle = runtime::start(&config, source, sink.clone()).unwrap();

    // The link stays quiet, so only an idle flush can hand the batch over
    let deadline = Instant::now() + Duration::from_secs(10);
    while sink.records().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(sink.records().len(), 1);

    handle.shutdown();
    let report = handle.join().unwrap();
    assert!(report.counters.flushes_forced >= 1);
    assert_eq!(report.counters.records_emitted, 1);
}
