//! Backend test support utilities
//!
//! Shared by the backend's unit tests and integration test binaries: one
//! tracing subscriber for all of them, and assertions for the problem-details
//! error contract that do not depend on backend types.

pub mod problem_details;
pub mod test_logging;
