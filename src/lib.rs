//! wspool - In-memory WebSocket connection pool.
//!
//! This crate upgrades HTTP requests into persistent WebSocket connections,
//! tracks them in a bounded registry and fans messages out to them, either to
//! a single client (unicast) or to every client (broadcast).
//!
//! # Components
//!
//! - [`registry`]: Connection table with two-phase admission control
//! - [`connection`]: Per-connection handle with serialized writes
//! - [`dispatcher`]: Unicast and broadcast delivery workers
//! - [`monitor`]: Keepalive ping loop
//! - [`reader`]: Per-connection inbound read loop
//! - [`handler`]: Inbound message handlers
//! - [`pool`]: The aggregate and its lifecycle
//! - [`routes`]: Axum routes for upgrading and health checks
//! - [`config`]: Pool and server configuration
//! - [`metrics`]: Pool metrics
//!
//! # Example
//!
//! ```no_run
//! use wspool::{ClientMessage, Pool, PoolConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::new(PoolConfig::default())?;
//!
//! // Echo every inbound message back to its sender.
//! pool.register_handler(|pool: Pool, msg: ClientMessage| async move {
//!     let _ = pool.send(msg.client_id, msg.payload).await;
//! })?;
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, wspool::routes::router(pool.clone())).await?;
//! pool.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod messages;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod reader;
pub mod registry;
pub mod routes;
pub mod transport;

pub use config::{ConfigError, PoolConfig, ServerConfig};
pub use connection::{ClientId, Connection};
pub use error::{CloseErrors, ErrorOutput, PoolError};
pub use handler::Handler;
pub use messages::{BroadcastMessage, ClientMessage, Outbound};
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use pool::{Pool, PoolState, Reservation};
pub use transport::{Frame, Transport, TransportError};
