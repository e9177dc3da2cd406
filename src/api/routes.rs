use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, pool_status, ready};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Liveness & readiness
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        // Pool snapshot
        .route("/health/database/pool", get(pool_status))
        .route("/metrics", get(prometheus_metrics))
}
