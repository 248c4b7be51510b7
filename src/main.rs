//! wspool server binary.
//!
//! Serves the pool over HTTP and echoes every inbound message back to its
//! sender.

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wspool::{routes, ClientMessage, Pool, PoolConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wspool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;
    let pool_config = PoolConfig::from_env().context("invalid pool configuration")?;

    tracing::info!(
        "Starting wspool on {} (capacity {}, ping every {:?})",
        server_config.addr(),
        pool_config.capacity,
        pool_config.ping_period()
    );

    let pool = Pool::new(pool_config).context("failed to create pool")?;
    pool.register_handler(|pool: Pool, msg: ClientMessage| async move {
        if let Err(e) = pool.send(msg.client_id, msg.payload).await {
            tracing::debug!(error = %e, "echo dropped");
        }
    })?;

    let listener = TcpListener::bind(server_config.addr())
        .await
        .with_context(|| format!("failed to bind {}", server_config.addr()))?;

    axum::serve(listener, routes::router(pool.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down wspool");
        })
        .await
        .context("server error")?;

    pool.close().await?;
    tracing::info!("wspool stopped");

    Ok(())
}
