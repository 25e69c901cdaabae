//! Feed connection statistics.
//!
//! Counters are updated from the read loop on every message and read by
//! the HTTP API, so the hot fields are atomics and the snapshot is built
//! without blocking the reader.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Shared feed counters. One instance lives for the process lifetime and
/// is shared between the feed client and the API.
pub struct FeedStats {
    host: String,
    port: u16,
    format: String,

    connected: AtomicBool,
    messages_total: AtomicU64,
    /// Messages in the current one-second window, swapped out by the rate
    /// ticker.
    window_count: AtomicU64,
    /// Messages counted in the last completed window.
    messages_per_sec: AtomicU64,
    reconnects: AtomicU64,

    /// SBS transmission-type counters, MSG,1 through MSG,8.
    per_type: [AtomicU64; 8],
    valid: AtomicU64,
    invalid: AtomicU64,
    with_position: AtomicU64,
    with_velocity: AtomicU64,

    timestamps: RwLock<Timestamps>,
}

#[derive(Default, Clone, Copy)]
struct Timestamps {
    last_message: Option<DateTime<Utc>>,
    connection_time: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the counters, served by `/api/v1/receiver/feed`.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatsSnapshot {
    pub connected: bool,
    pub host: String,
    pub port: u16,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_time: Option<DateTime<Utc>>,
    pub messages_total: u64,
    pub messages_per_sec: u64,
    pub reconnects: u64,
    pub message_types: [u64; 8],
    pub valid: u64,
    pub invalid: u64,
    pub with_position: u64,
    pub with_velocity: u64,
}

impl FeedStats {
    pub fn new(host: impl Into<String>, port: u16, format: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            format: format.into(),
            connected: AtomicBool::new(false),
            messages_total: AtomicU64::new(0),
            window_count: AtomicU64::new(0),
            messages_per_sec: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            per_type: Default::default(),
            valid: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            with_position: AtomicU64::new(0),
            with_velocity: AtomicU64::new(0),
            timestamps: RwLock::new(Timestamps::default()),
        }
    }

    /// Record one received message (of any validity).
    pub fn record_message(&self, now: DateTime<Utc>) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
        self.window_count.fetch_add(1, Ordering::Relaxed);
        self.timestamps.write().unwrap().last_message = Some(now);
    }

    /// Record the SBS transmission type of a parsed message.
    pub fn record_msg_type(&self, msg_type: u8) {
        if (1..=8).contains(&msg_type) {
            self.per_type[usize::from(msg_type) - 1].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_valid(&self) {
        self.valid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_position(&self) {
        self.with_position.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_velocity(&self) {
        self.with_velocity.fetch_add(1, Ordering::Relaxed);
    }

    /// Close out the current one-second window; called by the rate ticker.
    pub fn roll_rate_window(&self) {
        let count = self.window_count.swap(0, Ordering::Relaxed);
        self.messages_per_sec.store(count, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool, now: DateTime<Utc>) {
        self.connected.store(connected, Ordering::Relaxed);
        if connected {
            self.timestamps.write().unwrap().connection_time = Some(now);
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> FeedStatsSnapshot {
        let ts = *self.timestamps.read().unwrap();
        FeedStatsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            host: self.host.clone(),
            port: self.port,
            format: self.format.clone(),
            last_message: ts.last_message,
            connection_time: ts.connection_time,
            messages_total: self.messages_total.load(Ordering::Relaxed),
            messages_per_sec: self.messages_per_sec.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            message_types: std::array::from_fn(|i| self.per_type[i].load(Ordering::Relaxed)),
            valid: self.valid.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            with_position: self.with_position.load(Ordering::Relaxed),
            with_velocity: self.with_velocity.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = FeedStats::new("127.0.0.1", 30003, "sbs");
        let now = Utc::now();

        stats.record_message(now);
        stats.record_message(now);
        stats.record_msg_type(3);
        stats.record_msg_type(3);
        stats.record_msg_type(4);
        stats.record_valid();
        stats.record_invalid();
        stats.record_position();

        let snap = stats.snapshot();
        assert_eq!(snap.messages_total, 2);
        assert_eq!(snap.message_types[2], 2);
        assert_eq!(snap.message_types[3], 1);
        assert_eq!(snap.valid, 1);
        assert_eq!(snap.invalid, 1);
        assert_eq!(snap.with_position, 1);
        assert_eq!(snap.last_message, Some(now));
    }

    #[test]
    fn test_rate_window_swaps() {
        let stats = FeedStats::new("127.0.0.1", 30003, "sbs");
        let now = Utc::now();
        for _ in 0..5 {
            stats.record_message(now);
        }

        assert_eq!(stats.snapshot().messages_per_sec, 0);
        stats.roll_rate_window();
        assert_eq!(stats.snapshot().messages_per_sec, 5);

        // An empty window resets the rate.
        stats.roll_rate_window();
        assert_eq!(stats.snapshot().messages_per_sec, 0);
        // But the cumulative total is untouched.
        assert_eq!(stats.snapshot().messages_total, 5);
    }

    #[test]
    fn test_connection_state() {
        let stats = FeedStats::new("feed.local", 30005, "beast");
        assert!(!stats.is_connected());

        let now = Utc::now();
        stats.set_connected(true, now);
        assert!(stats.is_connected());
        assert_eq!(stats.snapshot().connection_time, Some(now));

        stats.set_connected(false, Utc::now());
        stats.record_reconnect();
        let snap = stats.snapshot();
        assert!(!snap.connected);
        assert_eq!(snap.reconnects, 1);
        // Connection time survives the disconnect.
        assert_eq!(snap.connection_time, Some(now));
    }

    #[test]
    fn test_out_of_range_msg_type_ignored() {
        let stats = FeedStats::new("127.0.0.1", 30003, "sbs");
        stats.record_msg_type(0);
        stats.record_msg_type(9);
        assert_eq!(stats.snapshot().message_types, [0; 8]);
    }
}
