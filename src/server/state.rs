use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::database::Database;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub database: Arc<Database>,
    pub start_time: Instant,
}

impl AppState {
    /// Wrap the database context built at startup; handlers share it from here.
    pub fn with_database(settings: Settings, database: Arc<Database>) -> Self {
        Self {
            settings: Arc::new(settings),
            database,
            start_time: Instant::now(),
        }
    }
}
