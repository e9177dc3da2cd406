//! Engine construction: one sqlx pool per process, configured from
//! [`DatabaseConfig`] and the URL's pool class.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::migrate::Migrator;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::{Any, AnyConnection, AnyPool, Connection, Transaction};

use crate::config::DatabaseConfig;
use crate::metrics::ConnectionMetrics;

use super::monitor::{EnginePoolMetrics, PoolMetrics};
use super::url::{Backend, DatabaseUrl, PoolClass};
use super::DatabaseError;

/// Effective pool arguments for an engine.
///
/// Null pools only carry `pool_pre_ping`; the sizing knobs have no meaning
/// for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineArgs {
    pub pool_class: PoolClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_overflow: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_recycle: Option<u64>,
    pub pool_pre_ping: bool,
}

impl EngineArgs {
    pub fn from_config(config: &DatabaseConfig, pool_class: PoolClass) -> Self {
        match pool_class {
            PoolClass::Queue => Self {
                pool_class,
                pool_size: Some(config.pool_size),
                max_overflow: Some(config.max_overflow),
                pool_timeout: Some(config.pool_timeout_seconds),
                pool_recycle: Some(config.pool_recycle_seconds),
                pool_pre_ping: config.pool_pre_ping,
            },
            PoolClass::Null => Self {
                pool_class,
                pool_size: None,
                max_overflow: None,
                pool_timeout: None,
                pool_recycle: None,
                pool_pre_ping: config.pool_pre_ping,
            },
        }
    }
}

/// Session timeouts applied to every new Postgres connection.
#[derive(Debug, Clone, Copy)]
struct SessionTimeouts {
    statement_ms: u64,
    idle_in_transaction_ms: u64,
    lock_ms: u64,
}

impl SessionTimeouts {
    fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            statement_ms: config.statement_timeout_ms,
            idle_in_transaction_ms: config.idle_in_transaction_timeout_ms,
            lock_ms: config.lock_timeout_ms,
        }
    }

    fn statements(&self) -> [String; 3] {
        [
            format!("SET statement_timeout = {}", self.statement_ms),
            format!(
                "SET idle_in_transaction_session_timeout = {}",
                self.idle_in_transaction_ms
            ),
            format!("SET lock_timeout = {}", self.lock_ms),
        ]
    }
}

/// Process-wide database engine.
///
/// Cloning is cheap and shares the same pool.
#[derive(Clone)]
pub struct Engine {
    pool: AnyPool,
    url: DatabaseUrl,
    args: EngineArgs,
    pool_size: u32,
    pool_timeout_seconds: u64,
}

impl Engine {
    /// Build the engine for `raw_url` without opening any connection.
    ///
    /// Connections are opened on first checkout. Must be called from within
    /// a Tokio runtime.
    pub fn build(raw_url: &str, config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        sqlx::any::install_default_drivers();

        let url = DatabaseUrl::parse(raw_url)?;
        let pool_class = url.pool_class();
        let args = EngineArgs::from_config(config, pool_class);
        let timeouts = SessionTimeouts::from_config(config);
        let backend = url.backend();

        let mut options = AnyPoolOptions::new()
            .max_connections(config.max_connections().max(1))
            .min_connections(0)
            .acquire_timeout(config.pool_timeout())
            .test_before_acquire(config.pool_pre_ping)
            .after_connect(move |conn, meta| {
                Box::pin(async move { on_connect(conn, meta, backend, timeouts).await })
            });

        options = match pool_class {
            PoolClass::Queue => options
                .max_lifetime(non_zero(config.pool_recycle()))
                .idle_timeout(non_zero(config.idle_timeout())),
            // Closing on release means every checkout opens a fresh connection
            PoolClass::Null => options.after_release(|_conn, _meta| Box::pin(async { Ok(false) })),
        };

        let pool = options.connect_lazy(url.connect_url())?;

        Ok(Self {
            pool,
            url,
            args,
            pool_size: config.pool_size,
            pool_timeout_seconds: config.pool_timeout_seconds,
        })
    }

    /// Build a single-connection engine for running migrations.
    pub fn for_migrations(raw_url: &str, config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let config = DatabaseConfig {
            pool_size: 1,
            max_overflow: 0,
            ..config.clone()
        };
        Self::build(raw_url, &config)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn url(&self) -> &DatabaseUrl {
        &self.url
    }

    pub fn args(&self) -> &EngineArgs {
        &self.args
    }

    pub fn pool_class(&self) -> PoolClass {
        self.args.pool_class
    }

    /// Acquire timeout applied to every checkout, for both pool classes.
    pub fn pool_timeout_seconds(&self) -> u64 {
        self.pool_timeout_seconds
    }

    /// Current pool counters, read in one go.
    pub fn pool_metrics(&self) -> EnginePoolMetrics {
        match self.args.pool_class {
            PoolClass::Queue => EnginePoolMetrics::queue(
                self.pool_size,
                self.pool.size(),
                self.pool.num_idle() as u32,
            ),
            PoolClass::Null => EnginePoolMetrics::null(),
        }
    }

    /// Apply the migrations found under `path`.
    pub async fn migrate(&self, path: &Path) -> Result<(), DatabaseError> {
        let migrator = Migrator::new(path).await?;
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::from_migrate(e, self.pool_timeout_seconds))?;
        tracing::info!(
            path = %path.display(),
            migrations = migrator.iter().count(),
            "Database migrations applied"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!(url = %self.url.masked(), "Database engine disposed");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let metrics = self.pool_metrics();
        f.debug_struct("Engine")
            .field("url", &self.url.masked())
            .field("args", &self.args)
            .field("size", &metrics.size())
            .field("checked_in", &metrics.checked_in())
            .finish()
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}

/// Runs once per physical connection.
async fn on_connect(
    conn: &mut AnyConnection,
    _meta: PoolConnectionMetadata,
    backend: Backend,
    timeouts: SessionTimeouts,
) -> Result<(), sqlx::Error> {
    ConnectionMetrics::record_opened();

    // Timeouts are Postgres session settings
    if backend != Backend::Postgres {
        return Ok(());
    }

    apply_session_timeouts(conn, timeouts).await?;

    match sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
        .fetch_one(&mut *conn)
        .await
    {
        Ok(pid) => tracing::debug!(pid, "New database connection established"),
        Err(e) => tracing::debug!(error = %e, "Could not read backend pid"),
    }

    Ok(())
}

async fn apply_session_timeouts(
    conn: &mut AnyConnection,
    timeouts: SessionTimeouts,
) -> Result<(), sqlx::Error> {
    let mut setup = AnySetupTransaction(Some(conn.begin().await?));
    run_setup_statements(&mut setup, &timeouts.statements()).await?;

    tracing::trace!(
        statement_timeout_ms = timeouts.statement_ms,
        idle_in_transaction_timeout_ms = timeouts.idle_in_transaction_ms,
        lock_timeout_ms = timeouts.lock_ms,
        "Connection timeouts applied"
    );
    Ok(())
}

/// Transaction used to configure a fresh connection.
#[async_trait]
trait SetupTransaction: Send {
    async fn execute(&mut self, statement: &str) -> Result<(), sqlx::Error>;
    async fn commit(&mut self) -> Result<(), sqlx::Error>;
    async fn rollback(&mut self) -> Result<(), sqlx::Error>;
}

struct AnySetupTransaction<'c>(Option<Transaction<'c, Any>>);

impl AnySetupTransaction<'_> {
    fn finished() -> sqlx::Error {
        sqlx::Error::Protocol("setup transaction already finished".to_string())
    }
}

#[async_trait]
impl<'c> SetupTransaction for AnySetupTransaction<'c> {
    async fn execute(&mut self, statement: &str) -> Result<(), sqlx::Error> {
        let tx = self.0.as_mut().ok_or_else(Self::finished)?;
        sqlx::query(statement).execute(&mut **tx).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.0.take().ok_or_else(Self::finished)?.commit().await
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.0.take().ok_or_else(Self::finished)?.rollback().await
    }
}

/// Run every statement in `tx`, then commit. The first failure rolls the
/// transaction back and is returned, which fails the connection.
async fn run_setup_statements<T: SetupTransaction>(
    tx: &mut T,
    statements: &[String],
) -> Result<(), sqlx::Error> {
    for statement in statements {
        if let Err(e) = tx.execute(statement).await {
            tracing::error!(error = %e, statement = %statement, "Failed to set connection timeouts");
            ConnectionMetrics::record_setup_failure();
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback after timeout setup failed");
            }
            return Err(e);
        }
    }

    tx.commit().await
}
