//! Database engine, sessions and pool monitoring.
//!
//! [`Database`] is built once at startup and shared through the application
//! state. A missing or broken URL never aborts startup: the database is then
//! reported as not configured and every session request fails with
//! [`DatabaseError::NotConfigured`].

pub mod engine;
pub mod error;
pub mod monitor;
pub mod session;
pub mod url;

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::DatabaseConfig;

pub use engine::{Engine, EngineArgs};
pub use error::DatabaseError;
pub use monitor::{EnginePoolMetrics, PoolMetrics, PoolMonitor, PoolStatus, UtilizationSample};
pub use session::{ensure_session, run_unit_of_work, DbSession, Session, SessionFactory, SessionState};
pub use url::{async_database_url, mask_url, Backend, DatabaseUrl, PoolClass};

/// Owns the engine and session factory for the lifetime of the process.
pub struct Database {
    config: DatabaseConfig,
    engine: Option<Engine>,
    session_factory: Option<SessionFactory>,
    monitor: Arc<PoolMonitor>,
}

impl Database {
    /// Build the engine from `config.url`.
    ///
    /// Never fails: problems are logged and leave the database unconfigured.
    /// Must be called from within a Tokio runtime when a URL is present.
    pub fn initialize(config: &DatabaseConfig) -> Self {
        let monitor = Arc::new(PoolMonitor::from_config(config));
        let mut database = Self {
            config: config.clone(),
            engine: None,
            session_factory: None,
            monitor: monitor.clone(),
        };

        log_retry_schedule(config);

        let raw_url = match config.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => {
                tracing::warn!("No database URL configured; database features are disabled");
                return database;
            }
        };

        match Engine::build(raw_url, config) {
            Ok(engine) => {
                tracing::info!(
                    url = %engine.url().masked(),
                    async_url = %mask_url(engine.url().async_url()),
                    pool_class = %engine.pool_class(),
                    max_connections = config.max_connections(),
                    pool_timeout_secs = config.pool_timeout_seconds,
                    pool_recycle_secs = config.pool_recycle_seconds,
                    "Database engine initialized"
                );
                database.session_factory = Some(SessionFactory::new(
                    engine.clone(),
                    monitor,
                    config.pool_timeout_seconds,
                ));
                database.engine = Some(engine);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize database engine");
                database.engine = None;
                database.session_factory = None;
            }
        }

        database
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    pub fn session_factory(&self) -> Option<&SessionFactory> {
        self.session_factory.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.engine.is_some()
    }

    /// A fresh session. The transaction starts on first use.
    pub fn session(&self) -> Result<Session, DatabaseError> {
        self.session_factory
            .as_ref()
            .map(SessionFactory::create)
            .ok_or(DatabaseError::NotConfigured)
    }

    /// Run `body` in a new session, committing on success and rolling back
    /// on error.
    pub async fn unit_of_work<T, E, F>(&self, body: F) -> Result<T, E>
    where
        T: Send,
        E: From<DatabaseError> + std::fmt::Display + Send,
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
    {
        let session = self.session()?;
        run_unit_of_work(session, body).await
    }

    /// Round trip through the pool with `SELECT 1`.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        self.unit_of_work(|session| {
            Box::pin(async move {
                session.execute("SELECT 1").await?;
                Ok::<_, DatabaseError>(())
            })
        })
        .await
    }

    pub fn pool_status(&self) -> PoolStatus {
        match &self.engine {
            Some(engine) => PoolStatus::snapshot(&engine.pool_metrics()),
            None => PoolStatus::unconfigured(),
        }
    }

    /// Sample utilization now. `None` without an engine or pool counters.
    pub fn check_pool(&self) -> Option<UtilizationSample> {
        let engine = self.engine.as_ref()?;
        self.monitor.check(&engine.pool_metrics())
    }

    /// Apply pending migrations on a dedicated single-connection engine.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let engine = self.engine.as_ref().ok_or(DatabaseError::NotConfigured)?;
        let migrations = Engine::for_migrations(engine.url().connect_url(), &self.config)?;
        let result = migrations
            .migrate(Path::new(&self.config.migrations_path))
            .await;
        migrations.close().await;
        result
    }

    /// Shutdown hook: close the pool.
    pub async fn close(&self) {
        if let Some(engine) = &self.engine {
            engine.close().await;
        }
    }
}

fn log_retry_schedule(config: &DatabaseConfig) {
    match config.retry_delays() {
        Ok(delays) => {
            let delays_ms: Vec<u128> = delays.iter().map(|d| d.as_millis()).collect();
            tracing::info!(
                attempts = config.transaction_retry_attempts,
                delays_ms = ?delays_ms,
                "Transaction retry schedule (not applied automatically)"
            );
        }
        Err(e) => tracing::warn!(error = %e, "Ignoring invalid transaction retry settings"),
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("engine", &self.engine)
            .field("configured", &self.is_configured())
            .finish()
    }
}
