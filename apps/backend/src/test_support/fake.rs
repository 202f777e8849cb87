use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::db::{
    ConnectError, ConnectPlan, Connector, DbBackend, DbError, DbSession, QueryOutput, SqlParam,
    StrategyName, StrategyShape, VERIFY_SQL,
};

const FAKE_DB_TIME: &str = "2026-01-01T00:00:00Z";

/// Scriptable [`Connector`] that keeps everything in memory.
///
/// Any strategy can be made to fail at open or at verification. The fake
/// counts backends that are open right now, records every connection string
/// it was handed, and models `BEGIN`/`COMMIT`/`ROLLBACK` well enough that a
/// rolled-back insert never shows up in [`committed`](Self::committed).
///
/// Verification can also be made to hang forever, which is how timeouts
/// around bootstrap and health checks are exercised.
///
/// Statements are recognised by their leading keyword: `INSERT` stores its
/// first parameter, `SELECT` returns one row per committed value, and any
/// statement containing `FAIL` errors.
#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    fail_open: Mutex<HashSet<StrategyName>>,
    fail_verify: Mutex<HashSet<StrategyName>>,
    hang_verify: Mutex<HashSet<StrategyName>>,
    opened: Mutex<Vec<ConnectPlan>>,
    open_backends: AtomicUsize,
    statements: Mutex<Vec<String>>,
    committed: Mutex<Vec<SqlParam>>,
    ping_fails: AtomicBool,
    ping_hangs: AtomicBool,
    close_fails: AtomicBool,
    commit_fails: AtomicBool,
    rollback_fails: AtomicBool,
    sessions_out: AtomicUsize,
    discarded: AtomicUsize,
    abandoned: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, strategy: StrategyName) -> &Self {
        self.inner.fail_open.lock().insert(strategy);
        self
    }

    pub fn fail_verify(&self, strategy: StrategyName) -> &Self {
        self.inner.fail_verify.lock().insert(strategy);
        self
    }

    pub fn fail_all(&self) -> &Self {
        self.inner.fail_open.lock().extend(StrategyName::ALL);
        self
    }

    /// Verification for `strategy` never completes.
    pub fn hang_verify(&self, strategy: StrategyName) -> &Self {
        self.inner.hang_verify.lock().insert(strategy);
        self
    }

    /// Let every strategy open again.
    pub fn heal(&self) -> &Self {
        self.inner.fail_open.lock().clear();
        self.inner.fail_verify.lock().clear();
        self.inner.hang_verify.lock().clear();
        self
    }

    /// Make verification queries on already-open backends fail.
    pub fn set_ping_fails(&self, fails: bool) {
        self.inner.ping_fails.store(fails, Ordering::SeqCst);
    }

    /// Make verification queries on already-open backends never answer.
    pub fn set_ping_hangs(&self, hangs: bool) {
        self.inner.ping_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn set_close_fails(&self, fails: bool) {
        self.inner.close_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_commit_fails(&self, fails: bool) {
        self.inner.commit_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_rollback_fails(&self, fails: bool) {
        self.inner.rollback_fails.store(fails, Ordering::SeqCst);
    }

    /// Backends opened and not yet closed.
    pub fn open_backends(&self) -> usize {
        self.inner.open_backends.load(Ordering::SeqCst)
    }

    /// Strategies in the order `open` was called for them.
    pub fn attempted(&self) -> Vec<StrategyName> {
        self.inner.opened.lock().iter().map(|p| p.strategy).collect()
    }

    /// Connection strings in the order they were handed to `open`.
    pub fn urls(&self) -> Vec<String> {
        self.inner.opened.lock().iter().map(|p| p.url.clone()).collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.inner.statements.lock().clone()
    }

    pub fn committed(&self) -> Vec<SqlParam> {
        self.inner.committed.lock().clone()
    }

    pub fn sessions_out(&self) -> usize {
        self.inner.sessions_out.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.inner.discarded.load(Ordering::SeqCst)
    }

    /// Sessions dropped with their transaction still open.
    pub fn abandoned(&self) -> usize {
        self.inner.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, plan: &ConnectPlan) -> Result<Arc<dyn DbBackend>, ConnectError> {
        self.inner.opened.lock().push(plan.clone());
        if self.inner.fail_open.lock().contains(&plan.strategy) {
            return Err(ConnectError::new(format!(
                "connection refused ({})",
                plan.strategy
            )));
        }
        self.inner.open_backends.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBackend {
            strategy: plan.strategy,
            state: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeBackend {
    strategy: StrategyName,
    state: Arc<FakeState>,
    closed: AtomicBool,
}

#[async_trait]
impl DbBackend for FakeBackend {
    fn shape(&self) -> StrategyShape {
        self.strategy.shape()
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::NotConnected);
        }
        if sql == VERIFY_SQL {
            let hangs = self.state.ping_hangs.load(Ordering::SeqCst)
                || self.state.hang_verify.lock().contains(&self.strategy);
            if hangs {
                futures::future::pending::<()>().await;
            }
            let fails = self.state.ping_fails.load(Ordering::SeqCst)
                || self.state.fail_verify.lock().contains(&self.strategy);
            if fails {
                return Err(DbError::query("server closed the connection unexpectedly", sql));
            }
            let row = json!({ "current_time": FAKE_DB_TIME, "health_check": 1 });
            return Ok(QueryOutput::from_rows(vec![into_row(row)]));
        }
        self.state.statements.lock().push(sql.to_string());
        autocommit(&self.state, sql, params)
    }

    async fn acquire(&self) -> Result<Box<dyn DbSession>, DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::NotConnected);
        }
        self.state.sessions_out.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            pending: Vec::new(),
            in_txn: false,
        }))
    }

    async fn close(&self) -> Result<(), ConnectError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.open_backends.fetch_sub(1, Ordering::SeqCst);
        }
        if self.state.close_fails.load(Ordering::SeqCst) {
            return Err(ConnectError::new("close failed"));
        }
        Ok(())
    }
}

struct FakeSession {
    state: Arc<FakeState>,
    pending: Vec<SqlParam>,
    in_txn: bool,
}

#[async_trait]
impl DbSession for FakeSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
        self.state.statements.lock().push(sql.to_string());
        match keyword(sql).as_str() {
            "BEGIN" => {
                self.in_txn = true;
                Ok(QueryOutput::affected(0))
            }
            "COMMIT" => {
                if self.state.commit_fails.load(Ordering::SeqCst) {
                    return Err(DbError::query("could not serialize access", sql));
                }
                self.in_txn = false;
                self.state.committed.lock().append(&mut self.pending);
                Ok(QueryOutput::affected(0))
            }
            "ROLLBACK" => {
                if self.state.rollback_fails.load(Ordering::SeqCst) {
                    return Err(DbError::query("connection reset", sql));
                }
                self.in_txn = false;
                self.pending.clear();
                Ok(QueryOutput::affected(0))
            }
            "INSERT" if self.in_txn && !sql.contains("FAIL") => {
                self.pending
                    .push(params.first().cloned().unwrap_or(SqlParam::Null));
                Ok(QueryOutput::affected(1))
            }
            _ => autocommit(&self.state, sql, params),
        }
    }

    async fn release(self: Box<Self>) {
        self.state.sessions_out.fetch_sub(1, Ordering::SeqCst);
    }

    async fn discard(self: Box<Self>) {
        self.state.sessions_out.fetch_sub(1, Ordering::SeqCst);
        self.state.discarded.fetch_add(1, Ordering::SeqCst);
    }

    fn abandon(self: Box<Self>) {
        // Pending inserts go with the session, as a server rollback would.
        self.state.sessions_out.fetch_sub(1, Ordering::SeqCst);
        self.state.abandoned.fetch_add(1, Ordering::SeqCst);
    }
}

fn autocommit(state: &FakeState, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
    if sql.contains("FAIL") {
        return Err(DbError::query("syntax error at or near \"FAIL\"", sql));
    }
    match keyword(sql).as_str() {
        "INSERT" => {
            state
                .committed
                .lock()
                .push(params.first().cloned().unwrap_or(SqlParam::Null));
            Ok(QueryOutput::affected(1))
        }
        "SELECT" => {
            let rows = state
                .committed
                .lock()
                .iter()
                .map(|p| into_row(json!({ "value": param_to_json(p) })))
                .collect();
            Ok(QueryOutput::from_rows(rows))
        }
        _ => Ok(QueryOutput::affected(0)),
    }
}

fn keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn param_to_json(param: &SqlParam) -> Value {
    match param {
        SqlParam::Null => Value::Null,
        SqlParam::Bool(v) => Value::from(*v),
        SqlParam::Int(v) => Value::from(*v),
        SqlParam::Float(v) => Value::from(*v),
        SqlParam::Text(v) => Value::from(v.as_str()),
        SqlParam::Json(v) => v.clone(),
    }
}

fn into_row(value: Value) -> crate::db::rows::Row {
    match value {
        Value::Object(map) => map,
        _ => crate::db::rows::Row::new(),
    }
}
