//! Test logging initialization shared by unit and integration tests.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Install a test-writer tracing subscriber once per process.
///
/// The filter is taken from `TEST_LOG`, then `RUST_LOG`, then falls back to
/// `"warn"`. Calling this repeatedly is harmless; `try_init` keeps a
/// subscriber installed by someone else in place.
///
/// ```bash
/// TEST_LOG=einfo_backend=debug cargo test -p einfo-backend
/// ```
pub fn init() {
    INITIALIZED.get_or_init(|| {
        let filter = std::env::var("TEST_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .map(EnvFilter::new)
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .without_time()
            .try_init()
            .ok();
    });
}
