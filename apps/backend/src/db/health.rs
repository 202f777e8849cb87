use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::backend::VERIFY_SQL;
use super::manager::{elapsed_ms, now_rfc3339, DbManager};
use super::strategy::StrategyName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a database health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub strategy: Option<StrategyName>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_time: Option<Value>,
    pub checked_at: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    fn unhealthy(strategy: Option<StrategyName>, latency_ms: u64, error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            strategy,
            latency_ms,
            error: Some(error),
            health_check: None,
            database_time: None,
            checked_at: now_rfc3339(),
        }
    }
}

impl DbManager {
    /// Check the active connection with the verification query.
    ///
    /// Never fails: a missing connection, a failing query, or a check that
    /// outlives the connect timeout are all reported as unhealthy.
    pub async fn health_check(&self) -> HealthReport {
        let Some(active) = self.active() else {
            return HealthReport::unhealthy(None, 0, "database not connected".to_string());
        };

        let started = Instant::now();
        let timeout = self.config().connect_timeout;
        let checked = tokio::time::timeout(timeout, active.backend.query(VERIFY_SQL, &[])).await;
        let latency_ms = elapsed_ms(started);

        match checked {
            Ok(Ok(out)) => {
                debug!(strategy = %active.strategy, latency_ms, "db_health=healthy");
                HealthReport {
                    status: HealthStatus::Healthy,
                    strategy: Some(active.strategy),
                    latency_ms,
                    error: None,
                    health_check: out.scalar("health_check").cloned(),
                    database_time: out.scalar("current_time").cloned(),
                    checked_at: now_rfc3339(),
                }
            }
            Ok(Err(e)) => {
                warn!(strategy = %active.strategy, error = %e, "db_health=unhealthy");
                HealthReport::unhealthy(Some(active.strategy), latency_ms, e.detail())
            }
            Err(_) => {
                warn!(strategy = %active.strategy, latency_ms, "db_health=timeout");
                HealthReport::unhealthy(
                    Some(active.strategy),
                    latency_ms,
                    format!("health check timed out after {}ms", timeout.as_millis()),
                )
            }
        }
    }
}
