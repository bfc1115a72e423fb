//! Server-specific error types
//!
//! Errors are layered the way the pipeline is: [`FetchError`] for anything
//! the upstream fetch can produce, [`SyncError`] for destination reads and
//! batch writes, and [`AppError`] for the HTTP surface. Per-source failures
//! are caught at the orchestrator and recorded in the run report; only
//! pre-flight conditions reach the client as an error response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

/// Errors produced by the upstream fetch layer
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("Upstream request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Invalid JSON response: {0}")]
    Parse(String),

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors produced by the reconciliation layer
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Application error for the HTTP surface.
///
/// Every variant maps to a 500 with a JSON body: a sync run only fails as
/// a whole when a pre-flight condition prevents it from starting.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Database(e) => AppError::Database(e),
            SyncError::Encode(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match self {
            AppError::Config(ref message) => {
                tracing::error!("Configuration error: {}", message);
                message.clone()
            },
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                "Database connection failed".to_string()
            },
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                message.clone()
            },
        };

        let body = Json(json!({
            "success": false,
            "error": message,
            "timestamp": Utc::now().to_rfc3339(),
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
