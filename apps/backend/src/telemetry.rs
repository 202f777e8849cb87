use einfo_backend::config::db::RuntimeEnv;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,einfo_backend=info,actix_web=info,sqlx=warn,sea_orm=warn";

/// JSON lines in production, compact human-readable lines elsewhere.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(env: RuntimeEnv) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let base = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(false);

    if env.is_production() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.compact())
            .init();
    }
}
