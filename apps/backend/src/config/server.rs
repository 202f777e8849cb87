use std::env;

use super::db::{bool_var, RuntimeEnv};
use crate::error::AppError;

/// HTTP listener settings and the degraded-start override.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Keep serving when the database bootstrap fails. Honored only outside
    /// production.
    pub allow_degraded_start: bool,
}

impl ServerConfig {
    pub fn from_env(runtime_env: RuntimeEnv) -> Result<Self, AppError> {
        let host = env::var("BACKEND_HOST").unwrap_or_else(|_| {
            if runtime_env.is_production() {
                "0.0.0.0".to_string()
            } else {
                "localhost".to_string()
            }
        });

        let port = match env::var("BACKEND_PORT") {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|_| {
                AppError::config(format!("BACKEND_PORT must be a valid port number, got '{raw}'"))
            })?,
            Err(_) => 8000,
        };

        let allow_degraded_start = bool_var("ALLOW_DEGRADED_START").map_err(AppError::from)?;

        Ok(Self {
            host,
            port,
            allow_degraded_start,
        })
    }
}
