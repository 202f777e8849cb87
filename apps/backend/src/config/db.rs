use std::env;
use std::fmt;
use std::time::Duration;

use crate::db::error::DbError;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_POOL_MAX: u32 = 20;
const DEFAULT_POOL_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Deployment mode, read from `APP_ENV` (falling back to `NODE_ENV`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeEnv {
    Production,
    Development,
    Test,
}

impl RuntimeEnv {
    pub fn from_env() -> Self {
        env::var("APP_ENV")
            .or_else(|_| env::var("NODE_ENV"))
            .map(|raw| Self::parse(&raw))
            .unwrap_or(RuntimeEnv::Development)
    }

    /// Unknown values fall back to development, matching an unset variable.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => RuntimeEnv::Production,
            "test" => RuntimeEnv::Test,
            _ => RuntimeEnv::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeEnv::Production => "production",
            RuntimeEnv::Development => "development",
            RuntimeEnv::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, RuntimeEnv::Production)
    }
}

impl fmt::Display for RuntimeEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the connection bootstrap needs to know about the database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Raw connection string; normalized per strategy before use.
    pub database_url: String,
    pub env: RuntimeEnv,
    /// Try the SSL-less strategies before the SSL ones.
    pub force_no_ssl: bool,
    /// Upper bound for opening a single strategy and for health checks.
    pub connect_timeout: Duration,
    pub pool_max: u32,
    pub pool_idle_timeout: Duration,
}

impl DbConfig {
    pub fn new(database_url: impl Into<String>, env: RuntimeEnv) -> Self {
        Self {
            database_url: database_url.into(),
            env,
            force_no_ssl: false,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            pool_max: DEFAULT_POOL_MAX,
            pool_idle_timeout: Duration::from_millis(DEFAULT_POOL_IDLE_TIMEOUT_MS),
        }
    }

    pub fn with_force_no_ssl(mut self, force_no_ssl: bool) -> Self {
        self.force_no_ssl = force_no_ssl;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Load the database configuration from the process environment.
    ///
    /// A missing or blank `DATABASE_URL` is a configuration error, distinct
    /// from any failure to actually reach the database.
    pub fn from_env() -> Result<Self, DbError> {
        let database_url = must_var("DATABASE_URL")?;
        let env = RuntimeEnv::from_env();

        Ok(Self {
            database_url,
            env,
            force_no_ssl: bool_var("FORCE_NO_SSL")?,
            connect_timeout: Duration::from_millis(parsed_var(
                "DB_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?),
            pool_max: parsed_var("DB_POOL_MAX", DEFAULT_POOL_MAX)?,
            pool_idle_timeout: Duration::from_millis(parsed_var(
                "DB_POOL_IDLE_TIMEOUT_MS",
                DEFAULT_POOL_IDLE_TIMEOUT_MS,
            )?),
        })
    }
}

/// Get required environment variable or return error
fn must_var(name: &str) -> Result<String, DbError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(DbError::configuration(format!(
            "Required environment variable '{name}' is not set"
        ))),
    }
}

/// Parse an optional boolean flag; only `true`/`1`/`yes` enable it.
pub(crate) fn bool_var(name: &str) -> Result<bool, DbError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(DbError::configuration(format!(
                "Environment variable '{name}' must be a boolean, got '{other}'"
            ))),
        },
        Err(_) => Ok(false),
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, DbError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            DbError::configuration(format!(
                "Environment variable '{name}' has an invalid value: '{raw}'"
            ))
        }),
        Err(_) => Ok(default),
    }
}
