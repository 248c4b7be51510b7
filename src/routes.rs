//! HTTP routes.
//!
//! `GET /ws/{id}` upgrades an already authorized client into the pool and
//! `GET /health` reports occupancy and metrics.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{OriginalUri, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::error::PoolError;
use super::metrics::PoolMetricsSnapshot;
use super::pool::{Pool, PoolState};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while running, `"closing"` or `"closed"` otherwise.
    pub status: &'static str,
    /// Live connections.
    pub connections: usize,
    /// Connection capacity.
    pub capacity: usize,
    /// Metrics snapshot.
    pub metrics: PoolMetricsSnapshot,
}

/// Builds the router serving `pool`.
pub fn router(pool: Pool) -> Router {
    Router::new()
        .route("/ws/{id}", get(connect))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(pool)
}

/// Upgrades the request and registers the client under `id`.
///
/// Authentication is expected to have happened upstream.
async fn connect(
    Path(client_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    State(pool): State<Pool>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!(client_id = %client_id, error = %rejection.body_text(), "failed to upgrade connection");
            pool.metrics().record_upgrade_failure();
            return PoolError::UpgradeFailed(rejection.body_text()).into_response_for(uri.path());
        }
    };

    match pool.register(client_id, upgrade) {
        Ok(response) => response,
        Err(e) => e.into_response_for(uri.path()),
    }
}

async fn health(State(pool): State<Pool>) -> impl IntoResponse {
    let status = match pool.state() {
        PoolState::Running => "ok",
        PoolState::Closing => "closing",
        PoolState::Closed => "closed",
    };

    Json(HealthResponse {
        status,
        connections: pool.count(),
        capacity: pool.capacity(),
        metrics: pool.metrics().snapshot(),
    })
}
