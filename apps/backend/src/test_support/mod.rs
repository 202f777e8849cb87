//! In-memory doubles for exercising the connection manager without Postgres.

pub mod fake;

pub use fake::FakeConnector;
