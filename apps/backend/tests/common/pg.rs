//! Helpers for tests that talk to a real Postgres.
//!
//! These tests only run when `EINFO_TEST_DATABASE_URL` (or `DATABASE_URL`)
//! points at a database whose name ends in `_test`; otherwise each test
//! returns early after printing why.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use einfo_backend::config::db::{DbConfig, RuntimeEnv};
use einfo_backend::db::{
    ConnectError, ConnectPlan, Connector, DbBackend, DbManager, PgConnector, StrategyName,
};

/// Connection string for the throwaway test database, if one is configured.
pub fn test_database_url() -> Option<String> {
    let url = env::var("EINFO_TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok()
        .filter(|url| !url.trim().is_empty());
    let Some(url) = url else {
        eprintln!("skipping: EINFO_TEST_DATABASE_URL is not set");
        return None;
    };
    if !database_name(&url).ends_with("_test") {
        eprintln!("skipping: test database name must end in _test");
        return None;
    }
    Some(url)
}

fn database_name(url: &str) -> &str {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query.rsplit('/').next().unwrap_or_default()
}

/// Real connector that refuses every strategy but one, so bootstrap is
/// forced onto a specific shape.
pub struct OnlyStrategy {
    strategy: StrategyName,
    inner: PgConnector,
}

impl OnlyStrategy {
    pub fn new(strategy: StrategyName) -> Self {
        Self {
            strategy,
            inner: PgConnector,
        }
    }
}

#[async_trait]
impl Connector for OnlyStrategy {
    async fn open(&self, plan: &ConnectPlan) -> Result<Arc<dyn DbBackend>, ConnectError> {
        if plan.strategy != self.strategy {
            return Err(ConnectError::new(format!("{} disabled for this test", plan.strategy)));
        }
        self.inner.open(plan).await
    }
}

pub fn pg_config(url: &str) -> DbConfig {
    DbConfig::new(url, RuntimeEnv::Test).with_connect_timeout(Duration::from_secs(5))
}

/// Bootstrapped manager pinned to `strategy`.
pub async fn pinned_manager(url: &str, strategy: StrategyName) -> Arc<DbManager> {
    let db = Arc::new(DbManager::new(
        pg_config(url),
        Arc::new(OnlyStrategy::new(strategy)),
    ));
    let won = db.bootstrap().await.expect("test database reachable");
    assert_eq!(won, strategy);
    db
}

/// Plan for opening `strategy` directly through the connector.
pub fn plan(url: &str, strategy: StrategyName) -> ConnectPlan {
    ConnectPlan {
        strategy,
        url: url.to_string(),
        connect_timeout: Duration::from_secs(5),
        pool_max: 4,
        idle_timeout: Duration::from_secs(30),
    }
}

/// Unique table name so concurrently running tests never collide.
pub fn scratch_table(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

pub async fn create_links_table(db: &DbManager, table: &str) {
    db.query(
        &format!("CREATE TABLE {table} (id BIGSERIAL PRIMARY KEY, url TEXT NOT NULL)"),
        &[],
    )
    .await
    .expect("create scratch table");
}

pub async fn drop_table(db: &DbManager, table: &str) {
    let _ = db.query(&format!("DROP TABLE IF EXISTS {table}"), &[]).await;
}

pub async fn count_rows(db: &DbManager, table: &str) -> i64 {
    let out = db
        .query(&format!("SELECT count(*) AS n FROM {table}"), &[])
        .await
        .expect("count rows");
    out.scalar("n").and_then(|v| v.as_i64()).expect("count is an integer")
}
