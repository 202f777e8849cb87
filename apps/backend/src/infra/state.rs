use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::db::DbConfig;
use crate::db::{Connector, DbError, DbManager};
use crate::error::AppError;
use crate::state::app_state::AppState;

/// Builder for creating AppState instances (used in both tests and main)
pub struct StateBuilder {
    db_config: Option<DbConfig>,
    connector: Option<Arc<dyn Connector>>,
    allow_degraded: bool,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self {
            db_config: None,
            connector: None,
            allow_degraded: false,
        }
    }

    pub fn with_db(mut self, config: DbConfig) -> Self {
        self.db_config = Some(config);
        self
    }

    /// Replace the Postgres connector, e.g. with an in-memory fake.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Keep going when every strategy fails. Ignored in production.
    pub fn allow_degraded(mut self, allow: bool) -> Self {
        self.allow_degraded = allow;
        self
    }

    /// Bootstrap the database and assemble the state.
    ///
    /// `ConnectionExhausted` is fatal unless degraded start was requested
    /// outside production; the state is then returned disconnected.
    pub async fn build(self) -> Result<AppState, AppError> {
        let config = self
            .db_config
            .ok_or_else(|| AppError::config("database configuration is required".to_string()))?;
        let env = config.env;
        let db = Arc::new(match self.connector {
            Some(connector) => DbManager::new(config, connector),
            None => DbManager::postgres(config),
        });

        match db.bootstrap().await {
            Ok(_) => {}
            Err(e @ DbError::ConnectionExhausted { .. })
                if self.allow_degraded && !env.is_production() =>
            {
                warn!(
                    env = %env,
                    error = %e,
                    "startup=degraded database_ready=false"
                );
            }
            Err(e) => return Err(e.into()),
        }

        Ok(AppState::new(db, env))
    }
}

impl Default for StateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_state() -> StateBuilder {
    StateBuilder::new()
}

/// How often a degraded server retries the database bootstrap.
pub const DB_RECOVERY_INTERVAL: Duration = Duration::from_secs(10);

/// Retry the bootstrap in the background until the database is reachable.
///
/// Meant for a server that started degraded; the task ends on the first
/// successful bootstrap, or immediately if the manager is already connected.
pub fn spawn_db_recovery(db: Arc<DbManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempt = 0u32;
        while !db.is_ready() {
            tokio::time::sleep(every).await;
            attempt += 1;
            match db.bootstrap().await {
                Ok(strategy) => {
                    info!(attempt, strategy = %strategy, "db_recovery=connected");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "db_recovery=still_unavailable");
                }
            }
        }
    })
}
