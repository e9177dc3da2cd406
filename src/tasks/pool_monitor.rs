use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::database::Database;

/// Background task sampling pool utilization between checkouts
pub struct PoolMonitorTask {
    database: Arc<Database>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl PoolMonitorTask {
    pub fn new(
        database: Arc<Database>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            database,
            interval,
            shutdown,
        }
    }

    /// Run until the shutdown signal fires
    pub async fn run(mut self) {
        if !self.database.is_configured() {
            tracing::debug!("Pool monitor not started: database not configured");
            return;
        }

        let mut timer = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Pool monitor task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Pool monitor task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    if let Some(sample) = self.database.check_pool() {
                        tracing::debug!(
                            active = sample.active,
                            capacity = sample.capacity,
                            utilization = sample.utilization,
                            "Pool sample"
                        );
                    }
                }
            }
        }

        tracing::info!("Pool monitor task stopped");
    }
}
