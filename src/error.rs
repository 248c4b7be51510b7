//! Pool error types.
//!
//! Provides the error taxonomy of the pool and its HTTP representation.

use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::connection::ClientId;
use super::transport::TransportError;

/// Errors returned by pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The registry is at capacity.
    #[error("pool is full")]
    PoolFull,

    /// The target client is not registered.
    #[error("client not found")]
    ClientNotFound,

    /// The client id is already live or has a pending upgrade.
    #[error("client {0} is already registered")]
    AlreadyRegistered(ClientId),

    /// The protocol upgrade could not be performed.
    #[error("failed to upgrade connection: {0}")]
    UpgradeFailed(String),

    /// The pool is closing or closed.
    #[error("pool is closed")]
    Closed,

    /// The underlying connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A write did not complete within the write deadline.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// Errors collected while closing connections.
    #[error("{0}")]
    CloseErrors(CloseErrors),
}

impl PoolError {
    /// Returns the HTTP status used when the error is reported to a peer.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::PoolFull | Self::Closed => StatusCode::SERVICE_UNAVAILABLE,
            Self::AlreadyRegistered(_) => StatusCode::CONFLICT,
            Self::UpgradeFailed(_) => StatusCode::BAD_REQUEST,
            Self::ClientNotFound => StatusCode::NOT_FOUND,
            Self::Transport(_) | Self::Timeout(_) | Self::CloseErrors(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Converts the error into a JSON response for the given request path.
    #[must_use]
    pub fn into_response_for(self, path: impl Into<String>) -> Response {
        let status = self.status_code();
        let body = ErrorOutput::new(self.to_string(), status, path);
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        self.into_response_for("")
    }
}

/// Per-connection errors collected by [`Pool::close`](crate::Pool::close).
#[derive(Debug, Default)]
pub struct CloseErrors(Vec<PoolError>);

impl CloseErrors {
    /// Creates an aggregate from the collected errors.
    #[must_use]
    pub fn new(errors: Vec<PoolError>) -> Self {
        Self(errors)
    }

    /// Returns the collected errors.
    #[must_use]
    pub fn errors(&self) -> &[PoolError] {
        &self.0
    }

    /// Returns the number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no errors were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CloseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to close {} connection(s)", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, err)?;
        }
        Ok(())
    }
}

/// JSON body returned to a peer whose upgrade was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorOutput {
    /// When the error occurred.
    pub timestamp: DateTime<Utc>,
    /// Human-readable message.
    pub message: String,
    /// HTTP status code.
    pub status: u16,
    /// Request path.
    pub path: String,
}

impl ErrorOutput {
    /// Creates an error body stamped with the current time.
    #[must_use]
    pub fn new(message: impl Into<String>, status: StatusCode, path: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            status: status.as_u16(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::PoolFull.to_string(), "pool is full");
        assert_eq!(PoolError::ClientNotFound.to_string(), "client not found");
        assert_eq!(
            PoolError::AlreadyRegistered(ClientId::from("a")).to_string(),
            "client a is already registered"
        );
    }

    #[test]
    fn test_pool_error_status_codes() {
        assert_eq!(
            PoolError::PoolFull.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PoolError::AlreadyRegistered(ClientId::from("a")).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PoolError::UpgradeFailed("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PoolError::Timeout(Duration::from_secs(1)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_close_errors_display() {
        let errors = CloseErrors::new(vec![
            PoolError::Transport(TransportError::Closed),
            PoolError::Timeout(Duration::from_secs(2)),
        ]);
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.to_string(),
            "failed to close 2 connection(s): transport error: connection closed; write timed out after 2s"
        );
    }

    #[test]
    fn test_error_output_serialization() {
        let body = ErrorOutput::new("pool is full", StatusCode::SERVICE_UNAVAILABLE, "/ws/1");
        let json = serde_json::to_value(&body).expect("serialize");

        assert_eq!(json["message"], "pool is full");
        assert_eq!(json["status"], 503);
        assert_eq!(json["path"], "/ws/1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_into_response_status() {
        let response = PoolError::PoolFull.into_response_for("/ws/1");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
