//! Health check and pool status endpoints.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::{Backend, DatabaseError, PoolClass, PoolStatus};
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checked_at: DateTime<Utc>,
    pub database: DatabaseHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealthResponse {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_class: Option<PoolClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub database: String,
}

/// GET /health - liveness, never touches the database
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.database.engine() {
        Some(engine) => DatabaseHealthResponse {
            configured: true,
            backend: Some(engine.url().backend()),
            pool_class: Some(engine.pool_class()),
            url: Some(engine.url().masked()),
        },
        None => DatabaseHealthResponse {
            configured: false,
            backend: None,
            pool_class: None,
            url: None,
        },
    };

    let status = if database.configured { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        checked_at: Utc::now(),
        database,
    })
}

/// GET /health/ready - 503 unless a query round-trips through the pool
pub async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>> {
    if !state.database.is_configured() {
        return Err(AppError::Database(DatabaseError::NotConfigured));
    }

    state.database.ping().await.map_err(|e| match e {
        DatabaseError::PoolTimeout { .. } => AppError::Database(e),
        other => AppError::ServiceUnavailable(format!("Database check failed: {}", other)),
    })?;

    Ok(Json(ReadyResponse {
        status: "ready".to_string(),
        database: "connected".to_string(),
    }))
}

/// GET /health/database/pool - pool counters; fields are null when the pool
/// does not track them
pub async fn pool_status(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.database.pool_status())
}
