//! Live connection handles.
//!
//! A [`Connection`] owns the write half of a transport behind an async mutex,
//! so that the unicast worker, the broadcast worker, the keepalive monitor and
//! the reader's pong replies never interleave a deadline-guarded write.

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::SinkExt;
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::error::PoolError;
use super::transport::{Frame, FrameSink};

/// Global connection serial counter.
static CONNECTION_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Generates a unique connection serial.
#[must_use]
pub fn next_connection_serial() -> u64 {
    CONNECTION_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// Identifier chosen by the caller that registered a client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a client id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<&ClientId> for ClientId {
    fn from(id: &ClientId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A registered, open connection.
pub struct Connection {
    /// Client id this connection is registered under.
    id: ClientId,

    /// Unique serial distinguishing reconnects under the same id.
    serial: u64,

    /// Serialized write half.
    writer: Mutex<FrameSink>,

    /// Deadline applied to every write.
    write_wait: Duration,

    /// Cancelled when the connection leaves the registry.
    closed: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("write_wait", &self.write_wait)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Creates a connection around the write half of a transport.
    #[must_use]
    pub fn new(id: ClientId, sink: FrameSink, write_wait: Duration) -> Self {
        Self {
            id,
            serial: next_connection_serial(),
            writer: Mutex::new(sink),
            write_wait,
            closed: CancellationToken::new(),
        }
    }

    /// Returns the client id.
    #[must_use]
    pub const fn id(&self) -> &ClientId {
        &self.id
    }

    /// Returns the connection serial.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// Returns true once the connection has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has been shut down.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Writes a frame under the write deadline.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Timeout`] if the write does not complete in time,
    /// or [`PoolError::Transport`] if the transport fails.
    pub async fn write(&self, frame: Frame) -> Result<(), PoolError> {
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_wait, writer.send(frame)).await {
            Ok(result) => result.map_err(PoolError::from),
            Err(_) => Err(PoolError::Timeout(self.write_wait)),
        }
    }

    /// Marks the connection closed without touching the transport.
    ///
    /// The reader stops and the transport is released once the last handle
    /// is dropped.
    pub fn abort(&self) {
        self.closed.cancel();
    }

    /// Marks the connection closed and performs a graceful transport close.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails or times out.
    pub async fn close(&self) -> Result<(), PoolError> {
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_wait, writer.close()).await {
            Ok(result) => result.map_err(PoolError::from),
            Err(_) => Err(PoolError::Timeout(self.write_wait)),
        }
    }
}
