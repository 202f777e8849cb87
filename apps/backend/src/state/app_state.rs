use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::db::RuntimeEnv;
use crate::db::DbManager;

/// Application state containing shared resources
#[derive(Debug, Clone)]
pub struct AppState {
    /// The process's database manager; connected unless started degraded
    pub db: Arc<DbManager>,
    pub env: RuntimeEnv,
    started_at: Instant,
}

impl AppState {
    pub fn new(db: Arc<DbManager>, env: RuntimeEnv) -> Self {
        Self {
            db,
            env,
            started_at: Instant::now(),
        }
    }

    pub fn db(&self) -> &DbManager {
        &self.db
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
