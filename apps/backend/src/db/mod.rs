//! Database connection bootstrap and the uniform query/transaction/health
//! façade over whichever strategy won.

pub mod backend;
pub mod conn_string;
pub mod error;
pub mod health;
pub mod manager;
pub mod pg;
pub mod rows;
pub mod strategy;
pub mod txn;

pub use backend::{ConnectPlan, Connector, DbBackend, DbSession, VERIFY_SQL};
pub use error::{AttemptStage, ConnectError, DbError, StrategyFailure};
pub use health::{HealthReport, HealthStatus};
pub use manager::{AttemptRecord, ConnectionInfo, DbManager};
pub use pg::PgConnector;
pub use rows::{QueryOutput, SqlParam};
pub use strategy::{StrategyName, StrategyShape};
pub use txn::TxnConn;
