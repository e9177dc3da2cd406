//! Sessions and the unit-of-work runner.
//!
//! A [`Session`] begins its transaction on first use, so creating one does
//! not touch the pool. [`run_unit_of_work`] commits when the body succeeds,
//! rolls back when it fails, and always closes the session.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::AnyConnection;
use sqlx::{Any, Transaction};

use crate::metrics::SessionMetrics;

use super::engine::Engine;
use super::monitor::PoolMonitor;
use super::DatabaseError;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transaction has been started yet
    Created,
    /// A transaction is open
    Active,
    Committed,
    RolledBack,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled_back",
            SessionState::Closed => "closed",
        }
    }
}

/// What a unit of work needs from a session.
///
/// Implemented by [`Session`] and by in-memory doubles in tests.
#[async_trait]
pub trait DbSession: Send {
    /// Run a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64, DatabaseError>;

    async fn commit(&mut self) -> Result<(), DatabaseError>;

    async fn rollback(&mut self) -> Result<(), DatabaseError>;

    /// Release the session. Calling it twice is a no-op.
    async fn close(&mut self);

    fn state(&self) -> SessionState;
}

/// Creates sessions bound to one engine.
#[derive(Clone)]
pub struct SessionFactory {
    engine: Engine,
    monitor: Arc<PoolMonitor>,
    pool_timeout_seconds: u64,
}

impl SessionFactory {
    pub fn new(engine: Engine, monitor: Arc<PoolMonitor>, pool_timeout_seconds: u64) -> Self {
        Self {
            engine,
            monitor,
            pool_timeout_seconds,
        }
    }

    pub fn create(&self) -> Session {
        Session {
            factory: self.clone(),
            tx: None,
            state: SessionState::Created,
        }
    }
}

/// A unit-of-work session over the engine's pool.
///
/// Holds at most one open transaction. Dropping a session with an open
/// transaction rolls it back when the connection returns to the pool.
pub struct Session {
    factory: SessionFactory,
    tx: Option<Transaction<'static, Any>>,
    state: SessionState,
}

impl Session {
    /// Connection of the open transaction, beginning one if needed.
    ///
    /// Use it to run typed sqlx queries inside the session's transaction.
    pub async fn connection(&mut self) -> Result<&mut AnyConnection, DatabaseError> {
        if self.state == SessionState::Closed {
            return Err(DatabaseError::SessionClosed);
        }

        if self.tx.is_none() {
            let tx = self
                .factory
                .engine
                .pool()
                .begin()
                .await
                .map_err(|e| {
                    DatabaseError::from(e).with_pool_timeout(self.factory.pool_timeout_seconds)
                })?;

            // Every checkout is a monitoring point
            self.factory
                .monitor
                .check(&self.factory.engine.pool_metrics());

            self.tx = Some(tx);
            self.state = SessionState::Active;
        }

        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(DatabaseError::SessionClosed),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}

#[async_trait]
impl DbSession for Session {
    async fn execute(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        let conn = self.connection().await?;
        let result = sqlx::query(sql).execute(conn).await?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        if self.state == SessionState::Closed {
            return Err(DatabaseError::SessionClosed);
        }
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        self.state = SessionState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        self.state = SessionState::RolledBack;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                tracing::warn!(error = %e, "Rollback of open transaction on close failed");
            }
        }
        self.state = SessionState::Closed;
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

/// Run `body` as one unit of work on `session`.
///
/// - body succeeds: commit, close, return the value
/// - body fails: roll back, close, return the body's error untouched
/// - commit fails: roll back, close, return the commit error
///
/// A failed rollback is logged and never replaces the original error.
pub async fn run_unit_of_work<S, T, E, F>(mut session: S, body: F) -> Result<T, E>
where
    S: DbSession,
    T: Send,
    E: From<DatabaseError> + fmt::Display + Send,
    F: for<'s> FnOnce(&'s mut S) -> BoxFuture<'s, Result<T, E>>,
{
    let outcome = match body(&mut session).await {
        Ok(value) => match session.commit().await {
            Ok(()) => {
                SessionMetrics::record_committed();
                Ok(value)
            }
            Err(e) => {
                tracing::error!(error = %e, "Commit failed, rolling back");
                rollback_quietly(&mut session).await;
                Err(E::from(e))
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Unit of work failed, rolling back");
            rollback_quietly(&mut session).await;
            Err(e)
        }
    };

    session.close().await;
    outcome
}

/// Unwrap an optionally injected session.
pub fn ensure_session<S: DbSession>(session: Option<S>) -> Result<S, DatabaseError> {
    session.ok_or(DatabaseError::SessionMissing)
}

async fn rollback_quietly<S: DbSession>(session: &mut S) {
    SessionMetrics::record_rolled_back();
    if let Err(e) = session.rollback().await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Calls {
        executed: Mutex<Vec<String>>,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        closes: AtomicUsize,
    }

    impl Calls {
        fn commits(&self) -> usize {
            self.commits.load(Ordering::SeqCst)
        }

        fn rollbacks(&self) -> usize {
            self.rollbacks.load(Ordering::SeqCst)
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    /// Records calls instead of talking to a database.
    #[derive(Default)]
    struct RecordingSession {
        calls: Arc<Calls>,
        fail_commit: bool,
        fail_rollback: bool,
        state: Option<SessionState>,
    }

    #[async_trait]
    impl DbSession for RecordingSession {
        async fn execute(&mut self, sql: &str) -> Result<u64, DatabaseError> {
            self.calls.executed.lock().unwrap().push(sql.to_string());
            self.state = Some(SessionState::Active);
            Ok(1)
        }

        async fn commit(&mut self) -> Result<(), DatabaseError> {
            self.calls.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(DatabaseError::SessionClosed);
            }
            self.state = Some(SessionState::Committed);
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), DatabaseError> {
            self.calls.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.fail_rollback {
                return Err(DatabaseError::SessionClosed);
            }
            self.state = Some(SessionState::RolledBack);
            Ok(())
        }

        async fn close(&mut self) {
            self.calls.closes.fetch_add(1, Ordering::SeqCst);
            self.state = Some(SessionState::Closed);
        }

        fn state(&self) -> SessionState {
            self.state.unwrap_or(SessionState::Created)
        }
    }

    #[derive(Debug, PartialEq)]
    enum BodyError {
        Business(&'static str),
        Database(String),
    }

    impl fmt::Display for BodyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                BodyError::Business(msg) => write!(f, "business: {}", msg),
                BodyError::Database(msg) => write!(f, "database: {}", msg),
            }
        }
    }

    impl From<DatabaseError> for BodyError {
        fn from(err: DatabaseError) -> Self {
            BodyError::Database(err.to_string())
        }
    }

    #[tokio::test]
    async fn test_success_commits_once_and_closes() {
        let session = RecordingSession::default();
        let calls = session.calls.clone();

        let value: Result<u64, BodyError> = run_unit_of_work(session, |s| {
            Box::pin(async move { Ok(s.execute("INSERT INTO t VALUES (1)").await?) })
        })
        .await;

        assert_eq!(value, Ok(1));
        assert_eq!(calls.commits(), 1);
        assert_eq!(calls.rollbacks(), 0);
        assert_eq!(calls.closes(), 1);
        assert_eq!(
            *calls.executed.lock().unwrap(),
            vec!["INSERT INTO t VALUES (1)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_preserves_error() {
        let session = RecordingSession::default();
        let calls = session.calls.clone();

        let result: Result<(), BodyError> = run_unit_of_work(session, |s| {
            Box::pin(async move {
                s.execute("UPDATE t SET x = 1").await?;
                Err(BodyError::Business("quota exceeded"))
            })
        })
        .await;

        assert_eq!(result, Err(BodyError::Business("quota exceeded")));
        assert_eq!(calls.commits(), 0);
        assert_eq!(calls.rollbacks(), 1);
        assert_eq!(calls.closes(), 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_does_not_mask_error() {
        let session = RecordingSession {
            fail_rollback: true,
            ..Default::default()
        };
        let calls = session.calls.clone();

        let result: Result<(), BodyError> = run_unit_of_work(session, |_s| {
            Box::pin(async move { Err(BodyError::Business("boom")) })
        })
        .await;

        assert_eq!(result, Err(BodyError::Business("boom")));
        assert_eq!(calls.rollbacks(), 1);
        assert_eq!(calls.closes(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        let session = RecordingSession {
            fail_commit: true,
            ..Default::default()
        };
        let calls = session.calls.clone();

        let result: Result<(), BodyError> =
            run_unit_of_work(session, |_s| Box::pin(async move { Ok(()) })).await;

        assert_eq!(
            result,
            Err(BodyError::Database("Session is closed".to_string()))
        );
        assert_eq!(calls.commits(), 1);
        assert_eq!(calls.rollbacks(), 1);
        assert_eq!(calls.closes(), 1);
    }

    #[test]
    fn test_ensure_session() {
        assert!(matches!(
            ensure_session::<RecordingSession>(None),
            Err(DatabaseError::SessionMissing)
        ));
        assert!(ensure_session(Some(RecordingSession::default())).is_ok());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::RolledBack.as_str(), "rolled_back");
        assert_eq!(
            serde_json::to_value(SessionState::Committed).unwrap(),
            "committed"
        );
    }
}
