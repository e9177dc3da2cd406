// Shared components
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Database layer
pub mod database;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod tasks;
