use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::backend::DbSession;
use super::error::{statement_excerpt, DbError};
use super::manager::DbManager;
use super::rows::{QueryOutput, SqlParam};
use super::strategy::StrategyName;

/// One physical connection held for the duration of a transaction.
///
/// Handed to the closure passed to [`DbManager::transaction`]; every
/// statement issued through it runs on the same connection, in order.
///
/// Dropping it before the transaction finished (the caller's future was
/// cancelled) abandons the session so the open transaction is rolled back
/// instead of leaking to the next user of the connection.
pub struct TxnConn {
    session: Option<Box<dyn DbSession>>,
    strategy: StrategyName,
}

impl TxnConn {
    pub fn strategy(&self) -> StrategyName {
        self.strategy
    }

    pub async fn query(&mut self, text: &str, params: &[SqlParam]) -> Result<QueryOutput, DbError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DbError::transaction("transaction already finished"))?;
        let out = session.execute(text, params).await;
        match &out {
            Ok(out) => debug!(
                strategy = %self.strategy,
                query = %statement_excerpt(text),
                row_count = out.row_count,
                "db_txn=statement"
            ),
            Err(e) => error!(
                strategy = %self.strategy,
                query = %statement_excerpt(text),
                error = %e,
                "db_txn=statement_failed"
            ),
        }
        out
    }

    async fn control(&mut self, statement: &str) -> Result<(), DbError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DbError::transaction("transaction already finished"))?;
        session
            .execute(statement, &[])
            .await
            .map(|_| ())
            .map_err(|e| DbError::transaction(format!("{statement} failed: {}", e.detail())))
    }

    async fn release(mut self) {
        if let Some(session) = self.session.take() {
            session.release().await;
        }
    }

    async fn discard(mut self) {
        if let Some(session) = self.session.take() {
            session.discard().await;
        }
    }
}

impl Drop for TxnConn {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!(strategy = %self.strategy, "db_txn=abandoned rollback=deferred");
            session.abandon();
        }
    }
}

impl DbManager {
    /// Run `f` inside `BEGIN` / `COMMIT` on a single connection.
    ///
    /// If `f` returns an error, `ROLLBACK` is issued before that error is
    /// returned. The connection goes back to its owner on every path; one
    /// whose `COMMIT` or `ROLLBACK` failed is discarded instead of reused.
    /// If the returned future is dropped midway the session is abandoned,
    /// which rolls the transaction back.
    ///
    /// ```ignore
    /// let id = db
    ///     .transaction(|tx| {
    ///         Box::pin(async move {
    ///             let out = tx.query("INSERT INTO links (url) VALUES ($1) RETURNING id", &[url.into()]).await?;
    ///             Ok::<_, DbError>(out.scalar("id").cloned())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: for<'c> FnOnce(&'c mut TxnConn) -> BoxFuture<'c, Result<R, E>>,
        E: From<DbError>,
    {
        let active = self.require_active()?;
        let session = active.backend.acquire().await?;
        let mut conn = TxnConn {
            session: Some(session),
            strategy: active.strategy,
        };

        if let Err(e) = conn.control("BEGIN").await {
            error!(strategy = %active.strategy, error = %e, "db_txn=begin_failed");
            conn.discard().await;
            return Err(e.into());
        }

        let outcome = f(&mut conn).await;

        match outcome {
            Ok(value) => match conn.control("COMMIT").await {
                Ok(()) => {
                    debug!(strategy = %active.strategy, "db_txn=committed");
                    conn.release().await;
                    Ok(value)
                }
                Err(e) => {
                    error!(strategy = %active.strategy, error = %e, "db_txn=commit_failed");
                    conn.discard().await;
                    Err(e.into())
                }
            },
            Err(err) => match conn.control("ROLLBACK").await {
                Ok(()) => {
                    debug!(strategy = %active.strategy, "db_txn=rolled_back");
                    conn.release().await;
                    Err(err)
                }
                Err(rollback_err) => {
                    warn!(
                        strategy = %active.strategy,
                        error = %rollback_err,
                        "db_txn=rollback_failed"
                    );
                    conn.discard().await;
                    Err(err)
                }
            },
        }
    }
}
