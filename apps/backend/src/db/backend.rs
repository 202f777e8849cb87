//! Seams between the connection manager and concrete drivers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::error::{ConnectError, DbError};
use super::rows::{QueryOutput, SqlParam};
use super::strategy::{StrategyName, StrategyShape};

/// Verification query used by bootstrap and by health checks.
pub const VERIFY_SQL: &str = "SELECT NOW() AS current_time, 1 AS health_check";

/// Everything a connector needs to open one strategy.
#[derive(Debug, Clone)]
pub struct ConnectPlan {
    pub strategy: StrategyName,
    /// Already rewritten for this strategy.
    pub url: String,
    pub connect_timeout: Duration,
    pub pool_max: u32,
    pub idle_timeout: Duration,
}

/// Opens backends for strategies. The real implementation talks to Postgres;
/// tests substitute an in-memory one.
#[async_trait]
pub trait Connector: Send + Sync {
    /// On error nothing may be left open.
    async fn open(&self, plan: &ConnectPlan) -> Result<Arc<dyn DbBackend>, ConnectError>;
}

/// An established pool or client.
#[async_trait]
pub trait DbBackend: Send + Sync {
    fn shape(&self) -> StrategyShape;

    /// Run one statement. Pool backends check out and release a connection
    /// around the call; client backends hold their lock for its duration.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError>;

    /// Take exclusive use of one physical connection until the session is released.
    async fn acquire(&self) -> Result<Box<dyn DbSession>, DbError>;

    /// Release every connection held. Calling it twice is harmless.
    async fn close(&self) -> Result<(), ConnectError>;
}

/// Exclusive use of one physical connection.
#[async_trait]
pub trait DbSession: Send {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError>;

    /// Hand the connection back for reuse.
    async fn release(self: Box<Self>);

    /// Hand the connection back after it may have been left mid-transaction.
    /// Pooled sessions close the connection instead of returning it.
    async fn discard(self: Box<Self>);

    /// Synchronous counterpart of `discard`, for a session dropped while a
    /// transaction may still be open. The open transaction must never be
    /// seen by the next user of the connection.
    fn abandon(self: Box<Self>);
}
