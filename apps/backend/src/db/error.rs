use std::fmt;

use thiserror::Error;

use super::strategy::StrategyName;

/// Longest statement excerpt carried in errors and logs.
const STATEMENT_EXCERPT_LEN: usize = 100;

/// Which step of a strategy attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    Open,
    Verify,
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStage::Open => f.write_str("open"),
            AttemptStage::Verify => f.write_str("verify"),
        }
    }
}

/// One failed strategy attempt. Recovered locally by the bootstrapper and only
/// ever surfaced as part of [`DbError::ConnectionExhausted`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{strategy} failed during {stage}: {message}")]
pub struct StrategyFailure {
    pub strategy: StrategyName,
    pub stage: AttemptStage,
    pub message: String,
}

impl StrategyFailure {
    pub fn new(strategy: StrategyName, stage: AttemptStage, message: impl Into<String>) -> Self {
        Self {
            strategy,
            stage,
            message: message.into(),
        }
    }
}

/// Failure reported by a [`Connector`](super::backend::Connector) while opening a backend.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConnectError(pub String);

impl ConnectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[error("Configuration error: {detail}")]
    Configuration { detail: String },
    #[error(
        "All PostgreSQL connection strategies failed. Last error: {}",
        last_failure_message(.failures)
    )]
    ConnectionExhausted { failures: Vec<StrategyFailure> },
    #[error("Database connection not established")]
    NotConnected,
    #[error("Query failed: {message} (statement: {statement})")]
    Query { message: String, statement: String },
    #[error("Transaction failed: {message}")]
    Transaction { message: String },
}

impl DbError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration {
            detail: detail.into(),
        }
    }

    /// Wrap a driver message together with an excerpt of the offending statement.
    pub fn query(message: impl Into<String>, sql: &str) -> Self {
        Self::Query {
            message: message.into(),
            statement: statement_excerpt(sql),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// The underlying message without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            DbError::Configuration { detail } => detail.clone(),
            DbError::ConnectionExhausted { failures } => last_failure_message(failures),
            DbError::NotConnected => "database connection not established".to_string(),
            DbError::Query { message, .. } => message.clone(),
            DbError::Transaction { message } => message.clone(),
        }
    }
}

fn last_failure_message(failures: &[StrategyFailure]) -> String {
    failures
        .last()
        .map(|f| f.message.clone())
        .unwrap_or_else(|| "no strategies were attempted".to_string())
}

/// Truncate a statement for diagnostics, on a char boundary.
pub fn statement_excerpt(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.chars().count() <= STATEMENT_EXCERPT_LEN {
        return trimmed.to_string();
    }
    let mut excerpt: String = trimmed.chars().take(STATEMENT_EXCERPT_LEN).collect();
    excerpt.push_str("...");
    excerpt
}
