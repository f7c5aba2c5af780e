//! Statistics for notification connections

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::protocol::CloseCode;

/// Per-connection statistics, owned by the connection task
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Total bytes received
    pub bytes_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Frames decoded from the peer
    pub frames_received: u64,
    /// Frames written to the peer
    pub frames_sent: u64,
    /// Notifications written to the peer
    pub notifications_sent: u64,
    /// Pings sent by the server
    pub pings_sent: u64,
}

impl ConnectionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }
}

/// Server-wide counters shared by every connection
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    notifications_published: AtomicU64,
    notifications_delivered: AtomicU64,
    overflows: AtomicU64,
    session_expirations: AtomicU64,
    closes: Mutex<BTreeMap<u16, u64>>,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Total connections ever opened
    pub connections_total: u64,
    /// Currently open connections
    pub connections_active: u64,
    /// Frames decoded from peers
    pub frames_received: u64,
    /// Frames written to peers
    pub frames_sent: u64,
    /// Notifications handed to the dispatcher
    pub notifications_published: u64,
    /// Notifications queued to connections
    pub notifications_delivered: u64,
    /// Connections closed because their outbound queue was full
    pub overflows: u64,
    /// Connections closed because their session was no longer valid
    pub session_expirations: u64,
    /// Closed connections by close code
    pub closes: BTreeMap<u16, u64>,
    /// Time since the stats were created
    pub uptime: Duration,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            notifications_published: AtomicU64::new(0),
            notifications_delivered: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            session_expirations: AtomicU64::new(0),
            closes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, code: CloseCode) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        *self.closes.lock().entry(code.as_u16()).or_insert(0) += 1;
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.notifications_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, count: u64) {
        self.notifications_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_expired(&self) {
        self.session_expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            notifications_published: self.notifications_published.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            session_expirations: self.session_expirations.load(Ordering::Relaxed),
            closes: self.closes.lock().clone(),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}
