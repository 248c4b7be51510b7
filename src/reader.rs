//! Per-connection inbound reader.
//!
//! One reader runs per connection and owns its read half. It waits for the
//! next frame under the read deadline and hands every payload to the pool's
//! handlers on its own task, so a slow handler only delays this connection.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::time::{self, Instant};
use tracing::{debug, error, trace};

use super::connection::Connection;
use super::error::PoolError;
use super::messages::ClientMessage;
use super::pool::Pool;
use super::transport::{Frame, FrameStream, TransportError};

/// Why a reader stopped.
///
/// A reader is active while [`InboundReader::run`] is pending; once it
/// returns, the connection has left the registry.
#[derive(Debug)]
pub enum ReaderExit {
    /// The connection was removed from the registry by someone else.
    Detached,
    /// The peer sent a close frame.
    PeerClosed,
    /// Reading failed.
    Failed(PoolError),
}

/// Inbound read loop for one connection.
pub struct InboundReader {
    pool: Pool,
    conn: Arc<Connection>,
    stream: FrameStream,
}

impl std::fmt::Debug for InboundReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundReader")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl InboundReader {
    /// Creates a reader bound to a registered connection.
    #[must_use]
    pub fn new(pool: Pool, conn: Arc<Connection>, stream: FrameStream) -> Self {
        Self {
            pool,
            conn,
            stream,
        }
    }

    /// Reads until the connection closes or fails, then unregisters it.
    pub async fn run(mut self) -> ReaderExit {
        let exit = self.read_loop().await;

        let shared = self.pool.shared();
        match &exit {
            ReaderExit::Detached => {
                trace!(client_id = %self.conn.id(), "reader detached");
            }
            ReaderExit::PeerClosed => {
                debug!(client_id = %self.conn.id(), "close client");
                if shared.detach(&self.conn) {
                    if let Err(e) = self.conn.close().await {
                        debug!(client_id = %self.conn.id(), error = %e, "close after peer close failed");
                    }
                }
            }
            ReaderExit::Failed(e) => {
                error!(client_id = %self.conn.id(), error = %e, "failed to receive client message");
                shared.metrics.record_read_failure();
                if shared.detach(&self.conn) {
                    self.conn.abort();
                }
            }
        }

        exit
    }

    async fn read_loop(&mut self) -> ReaderExit {
        let read_wait = self.pool.shared().config.read_wait();
        let mut deadline = Instant::now() + read_wait;

        loop {
            let next = tokio::select! {
                biased;
                () = self.conn.closed() => return ReaderExit::Detached,
                next = time::timeout_at(deadline, self.stream.next()) => next,
            };

            let frame = match next {
                Err(_) => return ReaderExit::Failed(TransportError::ReadTimeout.into()),
                Ok(None) => return ReaderExit::Failed(TransportError::Closed.into()),
                Ok(Some(Err(e))) => return ReaderExit::Failed(e.into()),
                Ok(Some(Ok(frame))) => frame,
            };

            // Any frame proves the peer is alive.
            deadline = Instant::now() + read_wait;

            match frame {
                Frame::Message(payload) => dispatch(&self.pool, &self.conn, payload).await,
                Frame::Ping(data) => {
                    if let Err(e) = self.conn.write(Frame::Pong(data)).await {
                        return ReaderExit::Failed(e);
                    }
                }
                Frame::Pong(_) => {
                    trace!(client_id = %self.conn.id(), "received pong");
                }
                Frame::Close => return ReaderExit::PeerClosed,
            }
        }
    }
}

/// Hands one inbound payload to the handlers.
async fn dispatch(pool: &Pool, conn: &Connection, payload: Bytes) {
    pool.shared().metrics.record_message_received();
    let msg = ClientMessage::new(conn.id(), payload);
    pool.handlers().dispatch(pool, &msg).await;
}
