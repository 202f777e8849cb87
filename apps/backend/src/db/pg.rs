//! Postgres backends for each strategy shape.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{
    Column, Connection, Either, Executor, PgConnection, PgPool, Postgres, Row, TypeInfo, ValueRef,
};
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::backend::{ConnectPlan, Connector, DbBackend, DbSession};
use super::error::{ConnectError, DbError};
use super::rows::{QueryOutput, Row as OutRow, SqlParam};
use super::strategy::{SslPosture, StrategyShape};

const APPLICATION_NAME: &str = "einfo-backend";

/// Opens real Postgres connections with sqlx, or through sea-orm for the
/// ORM-managed strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn open(&self, plan: &ConnectPlan) -> Result<Arc<dyn DbBackend>, ConnectError> {
        match plan.strategy.shape() {
            StrategyShape::Pool => open_pool(plan).await,
            StrategyShape::Client => open_client(plan).await,
            StrategyShape::Orm => open_orm(plan).await,
        }
    }
}

fn connect_options(plan: &ConnectPlan) -> Result<PgConnectOptions, ConnectError> {
    let opts = PgConnectOptions::from_str(&plan.url)
        .map_err(|e| ConnectError::new(format!("invalid connection string: {e}")))?
        .application_name(APPLICATION_NAME);
    Ok(match plan.strategy.ssl() {
        SslPosture::Disabled => opts.ssl_mode(PgSslMode::Disable),
        SslPosture::Permissive => opts,
    })
}

async fn open_pool(plan: &ConnectPlan) -> Result<Arc<dyn DbBackend>, ConnectError> {
    let opts = connect_options(plan)?;
    // connect_with establishes the first connection eagerly.
    let pool = PgPoolOptions::new()
        .max_connections(plan.pool_max)
        .min_connections(0)
        .acquire_timeout(plan.connect_timeout)
        .idle_timeout(Some(plan.idle_timeout))
        .connect_with(opts)
        .await
        .map_err(|e| ConnectError::new(format!("pool connect failed: {e}")))?;
    Ok(Arc::new(PgPoolBackend {
        pool,
        shape: StrategyShape::Pool,
    }))
}

async fn open_client(plan: &ConnectPlan) -> Result<Arc<dyn DbBackend>, ConnectError> {
    let opts = connect_options(plan)?;
    let conn = tokio::time::timeout(plan.connect_timeout, PgConnection::connect_with(&opts))
        .await
        .map_err(|_| {
            ConnectError::new(format!(
                "client connect timed out after {}ms",
                plan.connect_timeout.as_millis()
            ))
        })?
        .map_err(|e| ConnectError::new(format!("client connect failed: {e}")))?;
    Ok(Arc::new(PgClientBackend {
        conn: Arc::new(Mutex::new(Some(conn))),
        rollback_pending: Arc::new(AtomicBool::new(false)),
    }))
}

async fn open_orm(plan: &ConnectPlan) -> Result<Arc<dyn DbBackend>, ConnectError> {
    let mut opt = ConnectOptions::new(plan.url.clone());
    opt.max_connections(plan.pool_max)
        .min_connections(1)
        .connect_timeout(plan.connect_timeout)
        .acquire_timeout(plan.connect_timeout)
        .idle_timeout(plan.idle_timeout)
        .sqlx_logging(false);

    let db: DatabaseConnection = Database::connect(opt)
        .await
        .map_err(|e| ConnectError::new(format!("orm connect failed: {e}")))?;

    if db.get_database_backend() != DatabaseBackend::Postgres {
        if let Err(e) = db.close().await {
            debug!(error = %e, "db_bootstrap=cleanup_failed ignored=true");
        }
        return Err(ConnectError::new("orm connected to a non-Postgres backend"));
    }

    // Statements run on the ORM's underlying sqlx pool.
    let pool = db.get_postgres_connection_pool().clone();
    Ok(Arc::new(PgPoolBackend {
        pool,
        shape: StrategyShape::Orm,
    }))
}

/// sqlx pool, either opened directly or owned by sea-orm.
struct PgPoolBackend {
    pool: PgPool,
    shape: StrategyShape,
}

#[async_trait]
impl DbBackend for PgPoolBackend {
    fn shape(&self) -> StrategyShape {
        self.shape
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
        if self.pool.is_closed() {
            return Err(DbError::NotConnected);
        }
        run_query(&self.pool, sql, params).await
    }

    async fn acquire(&self) -> Result<Box<dyn DbSession>, DbError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::transaction(format!("connection checkout failed: {e}")))?;
        Ok(Box::new(PooledSession { conn }))
    }

    async fn close(&self) -> Result<(), ConnectError> {
        self.pool.close().await;
        Ok(())
    }
}

struct PooledSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl DbSession for PooledSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
        run_query(&mut *self.conn, sql, params).await
    }

    async fn release(self: Box<Self>) {
        // Dropping a PoolConnection returns it to the pool.
        drop(self.conn);
    }

    async fn discard(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "db_session=discard close_failed");
        }
    }

    fn abandon(self: Box<Self>) {
        // Detached so the pool never hands out a connection mid-transaction;
        // the server rolls back when the connection goes away.
        let raw = self.conn.detach();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = raw.close().await {
                        debug!(error = %e, "db_session=abandon close_failed");
                    }
                });
            }
            Err(_) => drop(raw),
        }
    }
}

/// A single connection shared by all callers through an async mutex.
///
/// `rollback_pending` is set when a transaction session was dropped with
/// its transaction still open; the next holder of the lock rolls it back
/// before running anything else.
struct PgClientBackend {
    conn: Arc<Mutex<Option<PgConnection>>>,
    rollback_pending: Arc<AtomicBool>,
}

impl PgClientBackend {
    async fn settle(&self, conn: &mut PgConnection) -> Result<(), DbError> {
        if !self.rollback_pending.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        match run_query(&mut *conn, "ROLLBACK", &[]).await {
            Ok(_) => {
                debug!("db_session=abandoned_rollback_done");
                Ok(())
            }
            Err(e) => {
                self.rollback_pending.store(true, Ordering::Release);
                Err(DbError::transaction(format!(
                    "rollback of abandoned transaction failed: {}",
                    e.detail()
                )))
            }
        }
    }
}

#[async_trait]
impl DbBackend for PgClientBackend {
    fn shape(&self) -> StrategyShape {
        StrategyShape::Client
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            Some(conn) => {
                self.settle(conn).await?;
                run_query(conn, sql, params).await
            }
            None => Err(DbError::NotConnected),
        }
    }

    async fn acquire(&self) -> Result<Box<dyn DbSession>, DbError> {
        let mut guard = self.conn.clone().lock_owned().await;
        match guard.as_mut() {
            Some(conn) => self.settle(conn).await?,
            None => return Err(DbError::NotConnected),
        }
        Ok(Box::new(ClientSession {
            guard,
            rollback_pending: self.rollback_pending.clone(),
        }))
    }

    async fn close(&self) -> Result<(), ConnectError> {
        let taken = self.conn.lock().await.take();
        match taken {
            Some(conn) => conn
                .close()
                .await
                .map_err(|e| ConnectError::new(format!("client close failed: {e}"))),
            None => Ok(()),
        }
    }
}

struct ClientSession {
    guard: OwnedMutexGuard<Option<PgConnection>>,
    rollback_pending: Arc<AtomicBool>,
}

#[async_trait]
impl DbSession for ClientSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
        match self.guard.as_mut() {
            Some(conn) => run_query(conn, sql, params).await,
            None => Err(DbError::NotConnected),
        }
    }

    async fn release(self: Box<Self>) {
        drop(self.guard);
    }

    async fn discard(self: Box<Self>) {
        // The client is the only connection; it stays in place.
        drop(self.guard);
    }

    fn abandon(self: Box<Self>) {
        // Flag before unlocking so the next holder sees it.
        self.rollback_pending.store(true, Ordering::Release);
        drop(self.guard);
    }
}

fn bind_params<'q>(sql: &'q str, params: &'q [SqlParam]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Json(v) => query.bind(sqlx::types::Json(v.clone())),
        })
}

async fn run_query<'e, E>(
    executor: E,
    sql: &'e str,
    params: &'e [SqlParam],
) -> Result<QueryOutput, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut stream = executor.fetch_many(bind_params(sql, params));
    let mut rows = Vec::new();
    let mut affected = 0u64;

    while let Some(item) = stream
        .try_next()
        .await
        .map_err(|e| DbError::query(e.to_string(), sql))?
    {
        match item {
            Either::Left(done) => affected += done.rows_affected(),
            Either::Right(row) => rows.push(row_to_map(&row).map_err(|e| DbError::query(e, sql))?),
        }
    }

    if rows.is_empty() {
        Ok(QueryOutput::affected(affected))
    } else {
        Ok(QueryOutput::from_rows(rows))
    }
}

fn row_to_map(row: &PgRow) -> Result<OutRow, String> {
    let mut out = OutRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_info().name())
            .map_err(|e| format!("failed to decode column '{}': {e}", column.name()))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(idx)?),
        "INT2" => Value::from(row.try_get::<i16, _>(idx)?),
        "INT4" => Value::from(row.try_get::<i32, _>(idx)?),
        "INT8" => Value::from(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => Value::from(row.try_get::<f32, _>(idx)?),
        "FLOAT8" => Value::from(row.try_get::<f64, _>(idx)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            Value::String(row.try_get::<String, _>(idx)?)
        }
        "JSON" | "JSONB" => row.try_get::<sqlx::types::Json<Value>, _>(idx)?.0,
        "UUID" => Value::String(row.try_get::<uuid::Uuid, _>(idx)?.to_string()),
        "TIMESTAMPTZ" => {
            let ts = row.try_get::<time::OffsetDateTime, _>(idx)?;
            Value::String(ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string()))
        }
        "TIMESTAMP" => Value::String(row.try_get::<time::PrimitiveDateTime, _>(idx)?.to_string()),
        "DATE" => Value::String(row.try_get::<time::Date, _>(idx)?.to_string()),
        "TEXT[]" | "VARCHAR[]" => Value::from(row.try_get::<Vec<String>, _>(idx)?),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::String)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}
