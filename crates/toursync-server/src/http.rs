//! HTTP surface
//!
//! Three routes: `/sync` accepts any method and triggers a full run,
//! `/health` is a liveness check, `/stats` exposes recent audit entries.
//! A run that starts always answers 200 with the run report, even when
//! every source failed; only pre-flight conditions (missing upstream key,
//! unreachable database) produce an error response.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderValue,
    response::Json,
    routing::{any, get},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::config::{Config, CorsConfig};
use crate::error::AppError;
use crate::fetch::TourApiClient;
use crate::orchestrator::{RunReport, SyncRunner};
use crate::sync::{check_connection, recent_sync_stats, Reconciler};

/// Shared application state.
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
}

/// Build the application router with middleware applied.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .route("/sync", any(trigger_sync))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.allowed_origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

/// Run the full sync and return the report.
///
/// The body is optional; when it carries a `debug_info` value, that value
/// is echoed back in the report so schedulers can correlate invocations.
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<RunReport>, AppError> {
    let debug_info = extract_debug_info(&body);
    info!(has_debug_info = debug_info.is_some(), "Sync run requested");

    let client = TourApiClient::from_config(&state.config.api)
        .map_err(|e| AppError::Config(e.to_string()))?;

    if !check_connection(&state.db).await {
        return Err(AppError::Internal("Database connection check failed".to_string()));
    }

    let runner = SyncRunner::new(client, Reconciler::new(state.db.clone()));
    let report = runner.run_all(debug_info).await;

    Ok(Json(report))
}

/// Pull a `debug_info` value out of an optional JSON request body.
fn extract_debug_info(body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|payload| payload.get("debug_info").cloned())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    days: Option<i64>,
}

/// Recent sync audit entries, newest first.
async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, AppError> {
    let days = query.days.unwrap_or(7).clamp(1, 90);
    let entries = recent_sync_stats(&state.db, days).await?;

    Ok(Json(json!({
        "success": true,
        "days": days,
        "count": entries.len(),
        "entries": entries,
    })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_info_extracted_from_json_body() {
        let body = br#"{"debug_info": {"invocation": 42}}"#;
        let value = extract_debug_info(body).unwrap();
        assert_eq!(value["invocation"], 42);
    }

    #[test]
    fn test_empty_and_malformed_bodies_yield_no_debug_info() {
        assert!(extract_debug_info(b"").is_none());
        assert!(extract_debug_info(b"not json").is_none());
        assert!(extract_debug_info(br#"{"other": 1}"#).is_none());
    }

    #[test]
    fn test_wildcard_origin_builds_permissive_cors() {
        // Only checks construction does not panic for both branches.
        cors_layer(&CorsConfig { allowed_origins: vec!["*".to_string()] });
        cors_layer(&CorsConfig {
            allowed_origins: vec!["https://example.com".to_string()],
        });
    }
}
