use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Database engine, pool and session knobs.
///
/// The defaults are the values the backend has always shipped with; every
/// field can be overridden from a config file or `DATABASE__<FIELD>`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. Taken from `DATABASE_URL` when present.
    #[serde(default)]
    pub url: Option<String>,
    /// Connections kept by a queue pool
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Extra connections allowed under burst load
    #[serde(default = "default_max_overflow")]
    pub max_overflow: u32,
    /// Seconds a caller waits for a pooled connection
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_seconds: u64,
    /// Seconds after which a connection is recycled
    #[serde(default = "default_pool_recycle")]
    pub pool_recycle_seconds: u64,
    /// Ping connections before handing them out
    #[serde(default = "default_true")]
    pub pool_pre_ping: bool,
    /// Seconds an idle connection stays open
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
    #[serde(default = "default_idle_in_transaction_timeout")]
    pub idle_in_transaction_timeout_ms: u64,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub transaction_retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub transaction_retry_delay_seconds: f64,
    #[serde(default = "default_retry_backoff")]
    pub transaction_retry_backoff: f64,
    /// Fraction of `pool_size + max_overflow` above which checkouts warn
    #[serde(default = "default_utilization_threshold")]
    pub utilization_warning_threshold: f64,
    /// Seconds between background pool samples
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,
    #[serde(default)]
    pub run_migrations: bool,
    #[serde(default = "default_migrations_path")]
    pub migrations_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_pool_size() -> u32 {
    20
}

fn default_max_overflow() -> u32 {
    30
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_pool_recycle() -> u64 {
    1800 // 30 minutes
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout() -> u64 {
    600 // 10 minutes
}

fn default_statement_timeout() -> u64 {
    30_000
}

fn default_idle_in_transaction_timeout() -> u64 {
    60_000
}

fn default_lock_timeout() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    0.1
}

fn default_retry_backoff() -> f64 {
    2.0
}

fn default_utilization_threshold() -> f64 {
    0.8
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_migrations_path() -> String {
    "migrations".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, DATABASE__POOL_SIZE, LOGGING__FORMAT, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            // The URL keeps its conventional name shared with the other services
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?;

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl DatabaseConfig {
    /// Upper bound on open connections for a queue pool.
    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_seconds)
    }

    pub fn pool_recycle(&self) -> Duration {
        Duration::from_secs(self.pool_recycle_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Backoff schedule described by the transaction retry settings.
    ///
    /// Nothing in this crate retries transactions; the schedule is logged at
    /// startup. Negative, NaN or overflowing delays are a config error.
    pub fn retry_delays(&self) -> Result<Vec<Duration>, ConfigError> {
        let mut delay = self.transaction_retry_delay_seconds;
        let mut delays = Vec::with_capacity(self.transaction_retry_attempts as usize);
        for attempt in 0..self.transaction_retry_attempts {
            let duration = Duration::try_from_secs_f64(delay).map_err(|e| {
                ConfigError::Message(format!(
                    "invalid transaction retry delay {} for attempt {}: {}",
                    delay,
                    attempt + 1,
                    e
                ))
            })?;
            delays.push(duration);
            delay *= self.transaction_retry_backoff;
        }
        Ok(delays)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            max_overflow: default_max_overflow(),
            pool_timeout_seconds: default_pool_timeout(),
            pool_recycle_seconds: default_pool_recycle(),
            pool_pre_ping: true,
            idle_timeout_seconds: default_idle_timeout(),
            statement_timeout_ms: default_statement_timeout(),
            idle_in_transaction_timeout_ms: default_idle_in_transaction_timeout(),
            lock_timeout_ms: default_lock_timeout(),
            transaction_retry_attempts: default_retry_attempts(),
            transaction_retry_delay_seconds: default_retry_delay(),
            transaction_retry_backoff: default_retry_backoff(),
            utilization_warning_threshold: default_utilization_threshold(),
            monitor_interval_seconds: default_monitor_interval(),
            run_migrations: false,
            migrations_path: default_migrations_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
