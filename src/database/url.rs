//! Database URL handling: scheme classification, async driver rewrite and
//! pool class selection.

use std::fmt;

use serde::Serialize;

use super::DatabaseError;

/// Scheme rewrites applied by [`async_database_url`], checked in order.
const ASYNC_SCHEME_REWRITES: [(&str, &str); 3] = [
    ("postgresql://", "postgresql+asyncpg://"),
    ("postgres://", "postgresql+asyncpg://"),
    ("sqlite://", "sqlite+aiosqlite://"),
];

/// Rewrite a plain database URL to its async-driver form.
///
/// Only the scheme prefix changes; everything after it is kept byte for byte.
/// URLs that already name a driver, or that use an unknown scheme, come back
/// unchanged. The `dialect+driver` form is the one shared with the Python
/// services reading the same `DATABASE_URL`.
pub fn async_database_url(raw: &str) -> String {
    for (plain, rewritten) in ASYNC_SCHEME_REWRITES {
        if let Some(rest) = raw.strip_prefix(plain) {
            return format!("{}{}", rewritten, rest);
        }
    }
    raw.to_string()
}

/// Mask the password of a URL for safe logging.
pub fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // The colon right after the scheme is not a password separator
            if !url[colon_pos..].starts_with("://") {
                let prefix = &url[..colon_pos + 1];
                let suffix = &url[at_pos..];
                return format!("{}***{}", prefix, suffix);
            }
        }
    }
    url.to_string()
}

/// Database backend named by a URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    /// Scheme understood by the sqlx driver.
    fn driver_scheme(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
        }
    }
}

/// Pool implementation chosen for a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolClass {
    /// Bounded pool that keeps and reuses connections
    Queue,
    /// No pooling: every released connection is closed
    Null,
}

impl PoolClass {
    /// File-based backends get no pooling, everything else a queue pool.
    pub fn for_url(url: &str) -> Self {
        if url.contains("sqlite") {
            PoolClass::Null
        } else {
            PoolClass::Queue
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolClass::Queue => "queue",
            PoolClass::Null => "null",
        }
    }
}

impl fmt::Display for PoolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed database URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    backend: Backend,
    driver: Option<String>,
    connect_url: String,
    async_url: String,
}

impl DatabaseUrl {
    /// Parse a plain (`postgres://`) or driver-qualified
    /// (`postgresql+asyncpg://`) URL.
    pub fn parse(raw: &str) -> Result<Self, DatabaseError> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once(':')
            .ok_or_else(|| DatabaseError::InvalidUrl(mask_url(raw)))?;

        let (dialect, driver) = match scheme.split_once('+') {
            Some((dialect, driver)) => (dialect, Some(driver.to_string())),
            None => (scheme, None),
        };

        let backend = match dialect.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Backend::Postgres,
            "sqlite" => Backend::Sqlite,
            _ => return Err(DatabaseError::InvalidUrl(mask_url(raw))),
        };

        if rest.is_empty() {
            return Err(DatabaseError::InvalidUrl(mask_url(raw)));
        }

        Ok(Self {
            backend,
            driver,
            connect_url: format!("{}:{}", backend.driver_scheme(), rest),
            async_url: async_database_url(raw),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Driver named in the scheme, if any.
    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    /// URL handed to sqlx.
    pub fn connect_url(&self) -> &str {
        &self.connect_url
    }

    /// `dialect+driver` form of the URL.
    pub fn async_url(&self) -> &str {
        &self.async_url
    }

    pub fn pool_class(&self) -> PoolClass {
        PoolClass::for_url(&self.connect_url)
    }

    /// Connect URL with the password masked.
    pub fn masked(&self) -> String {
        mask_url(&self.connect_url)
    }
}
