//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod routes;

pub use health::{health, pool_status, ready};
pub use health::{DatabaseHealthResponse, HealthResponse, ReadyResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
