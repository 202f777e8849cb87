use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::backend::{ConnectPlan, Connector, DbBackend, VERIFY_SQL};
use super::error::{statement_excerpt, AttemptStage, DbError, StrategyFailure};
use super::pg::PgConnector;
use super::rows::{QueryOutput, SqlParam};
use super::strategy::{strategy_order, StrategyDescriptor, StrategyName};
use crate::config::db::DbConfig;
use crate::logging::pii::Redacted;

/// The winning backend together with the tag describing how to use it.
/// Kept as one value so the two can never disagree.
#[derive(Clone)]
pub(crate) struct ActiveConnection {
    pub(crate) backend: Arc<dyn DbBackend>,
    pub(crate) strategy: StrategyName,
}

/// Outcome of one strategy attempt during the most recent bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub strategy: StrategyName,
    pub succeeded: bool,
    pub elapsed_ms: u64,
}

/// Diagnostic snapshot of the connection state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub strategy: String,
    pub connected: bool,
    pub timestamp: String,
}

/// Owns the process's single database connection.
///
/// Built once at startup and shared through `AppState`. `bootstrap` and
/// `shutdown` are serialized on an internal lifecycle lock; reads of the
/// active connection only clone an `Arc` out of the state lock.
pub struct DbManager {
    config: DbConfig,
    connector: Arc<dyn Connector>,
    state: RwLock<Option<ActiveConnection>>,
    lifecycle: Mutex<()>,
    attempts: RwLock<Vec<AttemptRecord>>,
}

impl DbManager {
    pub fn new(config: DbConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            state: RwLock::new(None),
            lifecycle: Mutex::new(()),
            attempts: RwLock::new(Vec::new()),
        }
    }

    /// Manager backed by real Postgres connections.
    pub fn postgres(config: DbConfig) -> Self {
        Self::new(config, Arc::new(PgConnector))
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Try each strategy in order until one opens and verifies.
    ///
    /// Returns the strategy that is active afterwards. When already connected
    /// this is a no-op; use [`reinitialize`](Self::reinitialize) to start over.
    pub async fn bootstrap(&self) -> Result<StrategyName, DbError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.bootstrap_locked().await
    }

    /// Close the active connection (if any) and bootstrap again.
    pub async fn reinitialize(&self) -> Result<StrategyName, DbError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_locked().await;
        self.bootstrap_locked().await
    }

    /// Release whatever connection is active. Safe to call repeatedly and
    /// before any bootstrap.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_locked().await;
    }

    async fn bootstrap_locked(&self) -> Result<StrategyName, DbError> {
        if let Some(active) = self.active() {
            info!(
                strategy = %active.strategy,
                "db_bootstrap=skipped already_connected=true"
            );
            return Ok(active.strategy);
        }

        if self.config.database_url.trim().is_empty() {
            return Err(DbError::configuration("DATABASE_URL is not configured"));
        }

        let order = strategy_order(self.config.force_no_ssl);
        info!(
            env = %self.config.env,
            force_no_ssl = self.config.force_no_ssl,
            strategies = order.len(),
            "db_bootstrap=start"
        );

        let mut failures = Vec::new();
        let mut records = Vec::with_capacity(order.len());

        for descriptor in &order {
            let started = Instant::now();
            let result = self.attempt(descriptor).await;
            let elapsed_ms = elapsed_ms(started);

            match result {
                Ok(backend) => {
                    info!(
                        strategy = %descriptor.name,
                        outcome = "success",
                        elapsed_ms,
                        "db_bootstrap=attempt"
                    );
                    records.push(AttemptRecord {
                        strategy: descriptor.name,
                        succeeded: true,
                        elapsed_ms,
                    });
                    *self.attempts.write() = records;
                    *self.state.write() = Some(ActiveConnection {
                        backend,
                        strategy: descriptor.name,
                    });
                    info!(strategy = %descriptor.name, "db_bootstrap=connected");
                    return Ok(descriptor.name);
                }
                Err(failure) => {
                    warn!(
                        strategy = %descriptor.name,
                        outcome = "failure",
                        stage = %failure.stage,
                        elapsed_ms,
                        error = %failure.message,
                        "db_bootstrap=attempt"
                    );
                    records.push(AttemptRecord {
                        strategy: descriptor.name,
                        succeeded: false,
                        elapsed_ms,
                    });
                    failures.push(failure);
                }
            }
        }

        *self.attempts.write() = records;
        let err = DbError::ConnectionExhausted { failures };
        error!(error = %err, "db_bootstrap=exhausted");
        Err(err)
    }

    /// Open one strategy and verify it. A backend that fails verification is
    /// closed before returning; cleanup failures are logged and dropped.
    async fn attempt(
        &self,
        descriptor: &StrategyDescriptor,
    ) -> Result<Arc<dyn DbBackend>, StrategyFailure> {
        let plan = ConnectPlan {
            strategy: descriptor.name,
            url: descriptor.connection_string(&self.config.database_url, self.config.env),
            connect_timeout: self.config.connect_timeout,
            pool_max: self.config.pool_max,
            idle_timeout: self.config.pool_idle_timeout,
        };
        debug!(
            strategy = %plan.strategy,
            url = %Redacted(&plan.url),
            "db_bootstrap=trying"
        );

        let backend = self
            .connector
            .open(&plan)
            .await
            .map_err(|e| StrategyFailure::new(plan.strategy, AttemptStage::Open, e.to_string()))?;

        let verified = tokio::time::timeout(plan.connect_timeout, backend.query(VERIFY_SQL, &[]))
            .await
            .unwrap_or_else(|_| {
                Err(DbError::query(
                    format!(
                        "verification timed out after {}ms",
                        plan.connect_timeout.as_millis()
                    ),
                    VERIFY_SQL,
                ))
            });

        match verified {
            Ok(out) => {
                debug!(
                    strategy = %plan.strategy,
                    health_check = ?out.scalar("health_check"),
                    current_time = ?out.scalar("current_time"),
                    "db_bootstrap=verified"
                );
                Ok(backend)
            }
            Err(e) => {
                if let Err(cleanup) = backend.close().await {
                    debug!(
                        strategy = %plan.strategy,
                        error = %cleanup,
                        "db_bootstrap=cleanup_failed ignored=true"
                    );
                }
                Err(StrategyFailure::new(
                    plan.strategy,
                    AttemptStage::Verify,
                    e.detail(),
                ))
            }
        }
    }

    async fn shutdown_locked(&self) {
        let active = self.state.write().take();
        match active {
            Some(active) => {
                if let Err(e) = active.backend.close().await {
                    warn!(strategy = %active.strategy, error = %e, "db_shutdown=close_failed");
                }
                info!(strategy = %active.strategy, "db_shutdown=closed");
            }
            None => debug!("db_shutdown=noop connected=false"),
        }
    }

    pub(crate) fn active(&self) -> Option<ActiveConnection> {
        self.state.read().clone()
    }

    pub(crate) fn require_active(&self) -> Result<ActiveConnection, DbError> {
        self.active().ok_or(DbError::NotConnected)
    }

    /// Readiness predicate: true once a bootstrap has succeeded and until shutdown.
    pub fn is_ready(&self) -> bool {
        self.state.read().is_some()
    }

    pub fn strategy(&self) -> Option<StrategyName> {
        self.state.read().as_ref().map(|a| a.strategy)
    }

    /// Per-strategy outcomes of the most recent bootstrap, in attempt order.
    pub fn last_attempts(&self) -> Vec<AttemptRecord> {
        self.attempts.read().clone()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let strategy = self.strategy();
        ConnectionInfo {
            strategy: strategy
                .map(|s| s.label().to_string())
                .unwrap_or_else(|| "not connected".to_string()),
            connected: strategy.is_some(),
            timestamp: now_rfc3339(),
        }
    }

    /// Run one statement on the active connection. Never retried.
    pub async fn query(&self, text: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
        let active = self.require_active()?;

        match active.backend.query(text, params).await {
            Ok(out) => {
                debug!(
                    strategy = %active.strategy,
                    query = %statement_excerpt(text),
                    param_count = params.len(),
                    row_count = out.row_count,
                    "db_query=ok"
                );
                Ok(out)
            }
            Err(e) => {
                error!(
                    strategy = %active.strategy,
                    query = %statement_excerpt(text),
                    param_count = params.len(),
                    error = %e,
                    "db_query=failed"
                );
                Err(e)
            }
        }
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

impl std::fmt::Debug for DbManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbManager")
            .field("env", &self.config.env)
            .field("strategy", &self.strategy())
            .finish()
    }
}
