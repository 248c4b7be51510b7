//! Pool metrics tracking.
//!
//! Provides atomic counters for monitoring the connection pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Metrics for the connection pool.
#[derive(Debug)]
pub struct PoolMetrics {
    /// Total connections installed.
    connections_opened: AtomicU64,

    /// Total connections removed.
    connections_closed: AtomicU64,

    /// Registrations refused (full, duplicate or closed).
    registrations_rejected: AtomicU64,

    /// Upgrade handshakes that failed after admission.
    upgrade_failures: AtomicU64,

    /// Total messages received.
    messages_received: AtomicU64,

    /// Total messages sent.
    messages_sent: AtomicU64,

    /// Writes that failed or timed out.
    write_failures: AtomicU64,

    /// Reads that failed or timed out.
    read_failures: AtomicU64,

    /// Keepalive pings written.
    pings_sent: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            registrations_rejected: AtomicU64::new(0),
            upgrade_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            pings_sent: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a connection opened.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection closed.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a refused registration.
    pub fn record_registration_rejected(&self) {
        self.registrations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed upgrade handshake.
    pub fn record_upgrade_failure(&self) {
        self.upgrade_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message received.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message sent.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a write failure.
    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a read failure.
    pub fn record_read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a keepalive ping.
    pub fn record_ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total connections opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Returns the total connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Returns the current active connections.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// Returns the total refused registrations.
    #[must_use]
    pub fn registrations_rejected(&self) -> u64 {
        self.registrations_rejected.load(Ordering::Relaxed)
    }

    /// Returns the total failed upgrades.
    #[must_use]
    pub fn upgrade_failures(&self) -> u64 {
        self.upgrade_failures.load(Ordering::Relaxed)
    }

    /// Returns the total messages received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Returns the total messages sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Returns the total write failures.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Returns the total read failures.
    #[must_use]
    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    /// Returns the total pings sent.
    #[must_use]
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns messages per second (received + sent).
    #[must_use]
    pub fn messages_per_second(&self) -> f64 {
        let elapsed = self.uptime().as_secs_f64();
        if elapsed > 0.0 {
            (self.messages_received() + self.messages_sent()) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            connections_opened: self.connections_opened(),
            connections_closed: self.connections_closed(),
            active_connections: self.active_connections(),
            registrations_rejected: self.registrations_rejected(),
            upgrade_failures: self.upgrade_failures(),
            messages_received: self.messages_received(),
            messages_sent: self.messages_sent(),
            write_failures: self.write_failures(),
            read_failures: self.read_failures(),
            pings_sent: self.pings_sent(),
            uptime_secs: self.uptime().as_secs(),
            messages_per_second: self.messages_per_second(),
        }
    }
}

/// A point-in-time snapshot of pool metrics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetricsSnapshot {
    /// Total connections opened.
    pub connections_opened: u64,
    /// Total connections closed.
    pub connections_closed: u64,
    /// Active connections.
    pub active_connections: u64,
    /// Refused registrations.
    pub registrations_rejected: u64,
    /// Failed upgrades.
    pub upgrade_failures: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Write failures.
    pub write_failures: u64,
    /// Read failures.
    pub read_failures: u64,
    /// Pings sent.
    pub pings_sent: u64,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Messages per second.
    pub messages_per_second: f64,
}
