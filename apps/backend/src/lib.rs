#![deny(clippy::wildcard_imports)]
#![cfg_attr(test, allow(clippy::wildcard_imports))]

pub mod config;
pub mod db;
pub mod error;
pub mod infra;
pub mod logging;
pub mod routes;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-exports for public API
pub use config::db::{DbConfig, RuntimeEnv};
pub use db::{DbError, DbManager, HealthReport, StrategyName};
pub use error::AppError;
pub use infra::state::build_state;
pub use state::app_state::AppState;

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    einfo_test_support::test_logging::init();
}
