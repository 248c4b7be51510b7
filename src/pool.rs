//! The connection pool.
//!
//! [`Pool`] ties the registry, the two dispatchers, the keepalive monitor and
//! the per-connection readers together and owns their lifecycle:
//!
//! ```text
//! Running --close()--> Closing --workers joined--> Closed
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::response::Response;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use super::config::{ConfigError, PoolConfig};
use super::connection::{ClientId, Connection};
use super::dispatcher::Dispatcher;
use super::error::{CloseErrors, PoolError};
use super::handler::{handler_fn, HandlerSet};
use super::messages::{BroadcastMessage, ClientMessage, Outbound};
use super::metrics::PoolMetrics;
use super::monitor;
use super::reader::InboundReader;
use super::registry::Registry;
use super::transport::{Frame, Transport};

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting registrations and messages.
    Running,
    /// Shutting down.
    Closing,
    /// Shut down; terminal.
    Closed,
}

/// State shared with the background workers.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: PoolConfig,
    pub(crate) registry: Registry,
    pub(crate) metrics: Arc<PoolMetrics>,
}

impl Shared {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            registry: Registry::new(config.capacity),
            metrics: Arc::new(PoolMetrics::new()),
            config,
        }
    }

    /// Writes a frame, evicting the connection if the write fails.
    ///
    /// Returns true if the write succeeded.
    pub(crate) async fn write_or_evict(
        &self,
        conn: &Arc<Connection>,
        frame: Frame,
        what: &'static str,
    ) -> bool {
        let counts_as_message = matches!(frame, Frame::Message(_));

        match conn.write(frame).await {
            Ok(()) => {
                if counts_as_message {
                    self.metrics.record_message_sent();
                }
                true
            }
            Err(e) => {
                if self.detach(conn) {
                    error!(client_id = %conn.id(), error = %e, "failed to send {}", what);
                    self.metrics.record_write_failure();
                    conn.abort();
                } else {
                    debug!(client_id = %conn.id(), error = %e, "failed to send {} to a detached connection", what);
                }
                false
            }
        }
    }

    /// Removes `conn` from the registry if it is still the registered entry.
    pub(crate) fn detach(&self, conn: &Connection) -> bool {
        let removed = self.registry.remove_connection(conn);
        if removed {
            debug!(client_id = %conn.id(), "unregister client");
            self.metrics.record_connection_closed();
        }
        removed
    }
}

struct PoolInner {
    shared: Arc<Shared>,
    handlers: HandlerSet,
    unicast: Dispatcher,
    broadcast: Dispatcher,
    state: Mutex<PoolState>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Stop the monitor if the pool goes away without being closed.
        self.shutdown.cancel();
    }
}

/// Bounded pool of live WebSocket connections.
///
/// `Pool` is a cheap handle; clones share the same registry and workers.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("state", &self.state())
            .field("count", &self.count())
            .field("capacity", &self.capacity())
            .field("handlers", &self.inner.handlers.len())
            .finish()
    }
}

impl Pool {
    /// Creates a pool and starts its dispatch workers and keepalive monitor.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let queue_capacity = config.queue_capacity;
        let shared = Arc::new(Shared::new(config));
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();

        let unicast = Dispatcher::spawn("unicast", queue_capacity, Arc::clone(&shared), &tasks);
        let broadcast =
            Dispatcher::spawn("broadcast", queue_capacity, Arc::clone(&shared), &tasks);
        tasks.spawn(monitor::run(Arc::clone(&shared), shutdown.clone()));

        info!(
            capacity = shared.registry.capacity(),
            queue_capacity, "websocket pool started"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                shared,
                handlers: HandlerSet::new(),
                unicast,
                broadcast,
                state: Mutex::new(PoolState::Running),
                shutdown,
                tasks,
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    pub(crate) fn handlers(&self) -> &HandlerSet {
        &self.inner.handlers
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.shared.config
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.inner.shared.metrics)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        *self.inner.state.lock()
    }

    /// Returns true while the pool accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.shared.registry.len()
    }

    /// Returns the maximum number of connections.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.shared.registry.capacity()
    }

    /// Returns true if `client_id` is live.
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.inner.shared.registry.contains(client_id)
    }

    /// Registers an already authorized client and upgrades its request.
    ///
    /// A slot is reserved before the handshake; the returned response must
    /// be sent to the peer for the upgrade to complete. Once it does, the
    /// connection is installed and its reader started.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::PoolFull`] if the pool is at capacity,
    /// [`PoolError::AlreadyRegistered`] if the id is taken and
    /// [`PoolError::Closed`] if the pool is shutting down. In every case no
    /// upgrade takes place; the error converts into the response to send.
    pub fn register(
        &self,
        client_id: impl Into<ClientId>,
        upgrade: WebSocketUpgrade,
    ) -> Result<Response, PoolError> {
        let reservation = self.reserve(client_id)?;
        let config = self.config();

        let failed_id = reservation.client_id().clone();
        let metrics = self.metrics();

        let response = upgrade
            .read_buffer_size(config.read_buffer_size)
            .write_buffer_size(config.write_buffer_size)
            .max_message_size(config.max_message_size)
            .on_failed_upgrade(move |e| {
                error!(client_id = %failed_id, error = %e, "failed to upgrade connection");
                metrics.record_upgrade_failure();
            })
            .on_upgrade(move |socket| async move {
                let client_id = reservation.client_id().clone();
                if let Err(e) = reservation.attach(Transport::from_websocket(socket)) {
                    warn!(client_id = %client_id, error = %e, "dropping upgraded connection");
                }
            });

        Ok(response)
    }

    /// Reserves a slot for `client_id` ahead of attaching a transport.
    ///
    /// Dropping the reservation without attaching releases the slot.
    ///
    /// # Errors
    ///
    /// Same as [`Pool::register`].
    pub fn reserve(&self, client_id: impl Into<ClientId>) -> Result<Reservation, PoolError> {
        let client_id = client_id.into();
        debug!(client_id = %client_id, "register client");

        let result = if self.is_running() {
            self.inner.shared.registry.reserve(&client_id)
        } else {
            Err(PoolError::Closed)
        };

        match result {
            Ok(()) => Ok(Reservation {
                pool: self.clone(),
                client_id,
                armed: true,
            }),
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "registration rejected");
                self.inner.shared.metrics.record_registration_rejected();
                Err(e)
            }
        }
    }

    /// Installs a transport under a reserved id and starts its reader.
    fn install(&self, client_id: ClientId, transport: Transport) -> Result<(), PoolError> {
        let shared = &self.inner.shared;
        let (sink, stream) = transport.into_parts();
        let conn = Arc::new(Connection::new(client_id, sink, shared.config.write_wait()));

        let reader = InboundReader::new(self.clone(), Arc::clone(&conn), stream);
        shared.registry.install(Arc::clone(&conn), || {
            self.inner.tasks.spawn(reader.run());
        })?;

        shared.metrics.record_connection_opened();
        debug!(client_id = %conn.id(), serial = conn.serial(), "client connected");
        Ok(())
    }

    /// Removes a client and closes its connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ClientNotFound`] if the id is not live, or the
    /// error raised while closing the connection.
    pub async fn unregister(&self, client_id: &str) -> Result<(), PoolError> {
        let shared = &self.inner.shared;
        let conn = shared
            .registry
            .remove(client_id)
            .ok_or(PoolError::ClientNotFound)?;

        debug!(client_id = %conn.id(), "unregister client");
        shared.metrics.record_connection_closed();
        conn.close().await
    }

    /// Appends a handler invoked for every inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] once the pool is shutting down.
    pub fn register_handler<F, Fut>(&self, f: F) -> Result<(), PoolError>
    where
        F: Fn(Pool, ClientMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.is_running() {
            return Err(PoolError::Closed);
        }
        self.inner.handlers.push(handler_fn(f));
        Ok(())
    }

    /// Queues a payload for one client.
    ///
    /// Waits while the unicast queue is full. Sending to an id that is not
    /// registered is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] once the pool is shutting down.
    pub async fn send(
        &self,
        client_id: impl Into<ClientId>,
        payload: impl Into<Bytes>,
    ) -> Result<(), PoolError> {
        if !self.is_running() {
            return Err(PoolError::Closed);
        }

        let msg = ClientMessage::new(client_id, payload);
        if !self.contains(msg.client_id.as_str()) {
            trace!(client_id = %msg.client_id, "send to unknown client ignored");
            return Ok(());
        }

        trace!(client_id = %msg.client_id, "send client message");
        self.inner.unicast.enqueue(Outbound::Unicast(msg)).await
    }

    /// Queues a payload for every connected client.
    ///
    /// Waits while the broadcast queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] once the pool is shutting down.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<(), PoolError> {
        if !self.is_running() {
            return Err(PoolError::Closed);
        }

        trace!("send broadcast message");
        self.inner
            .broadcast
            .enqueue(Outbound::Broadcast(BroadcastMessage::new(payload)))
            .await
    }

    /// Shuts the pool down.
    ///
    /// Closes every connection, stops accepting messages, lets the
    /// dispatchers drain, stops the monitor and waits for every task the
    /// pool started. Must not be awaited from inside a handler.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool is not running, or
    /// [`PoolError::CloseErrors`] with every connection that failed to close.
    pub async fn close(&self) -> Result<(), PoolError> {
        {
            let mut state = self.inner.state.lock();
            if *state != PoolState::Running {
                return Err(PoolError::Closed);
            }
            *state = PoolState::Closing;
        }
        info!("closing websocket pool");

        let shared = &self.inner.shared;
        let conns = shared.registry.drain();
        let results = join_all(conns.iter().map(|conn| conn.close())).await;

        let mut errors = Vec::new();
        for (conn, result) in conns.iter().zip(results) {
            shared.metrics.record_connection_closed();
            if let Err(e) = result {
                warn!(client_id = %conn.id(), error = %e, "failed to close connection");
                errors.push(e);
            }
        }
        debug!("all websocket connections are closed");

        for queue in [&self.inner.unicast, &self.inner.broadcast] {
            queue.close();
            debug!(queue = queue.name(), "queue closed");
        }
        self.inner.shutdown.cancel();

        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        *self.inner.state.lock() = PoolState::Closed;
        info!("websocket pool closed");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoolError::CloseErrors(CloseErrors::new(errors)))
        }
    }
}

/// A reserved registry slot waiting for its transport.
///
/// Dropping a reservation without calling [`Reservation::attach`] frees the
/// slot, which is how a failed upgrade gives its capacity back.
#[must_use = "dropping a reservation releases the slot"]
pub struct Reservation {
    pool: Pool,
    client_id: ClientId,
    armed: bool,
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("client_id", &self.client_id)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Reservation {
    /// Returns the reserved id.
    #[must_use]
    pub const fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Installs the transport and starts its reader.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool shut down while the
    /// handshake was in flight; the transport is dropped.
    pub fn attach(mut self, transport: Transport) -> Result<(), PoolError> {
        self.armed = false;
        self.pool.install(self.client_id.clone(), transport)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed && self.pool.inner.shared.registry.release(&self.client_id) {
            debug!(client_id = %self.client_id, "reservation released");
        }
    }
}
