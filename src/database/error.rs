use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Errors surfaced by the database layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database not configured")]
    NotConfigured,

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    /// `timeout_seconds` is `None` when the failing path did not know the
    /// configured acquire timeout.
    #[error(
        "Timed out{} waiting for a pooled connection",
        .timeout_seconds.map(|s| format!(" after {}s", s)).unwrap_or_default()
    )]
    PoolTimeout { timeout_seconds: Option<u64> },

    #[error("Expected a database session but got none")]
    SessionMissing,

    #[error("Session is closed")]
    SessionClosed,

    #[error("SQLx error: {0}")]
    Sqlx(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] MigrateError),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        // Pool exhaustion keeps its own variant so callers can answer 503
        match err {
            sqlx::Error::PoolTimedOut => DatabaseError::PoolTimeout {
                timeout_seconds: None,
            },
            other => DatabaseError::Sqlx(other),
        }
    }
}

impl DatabaseError {
    /// Attach the configured acquire timeout to a pool timeout.
    pub(crate) fn with_pool_timeout(self, timeout_seconds: u64) -> Self {
        match self {
            DatabaseError::PoolTimeout { .. } => DatabaseError::PoolTimeout {
                timeout_seconds: Some(timeout_seconds),
            },
            other => other,
        }
    }

    /// Classify a migration failure; a pool timeout while acquiring the
    /// migration connection keeps its own variant.
    pub(crate) fn from_migrate(err: MigrateError, timeout_seconds: u64) -> Self {
        match err {
            MigrateError::Execute(sqlx::Error::PoolTimedOut) => DatabaseError::PoolTimeout {
                timeout_seconds: Some(timeout_seconds),
            },
            other => DatabaseError::Migrate(other),
        }
    }
}
