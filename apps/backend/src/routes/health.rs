use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::db::HealthReport;
use crate::error::AppError;
use crate::state::app_state::AppState;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn root() -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "message": "E-Info backend is running",
        "status": "healthy",
        "version": APP_VERSION,
    })))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    uptime_secs: u64,
    database: HealthReport,
    version: &'static str,
    environment: &'static str,
}

pub async fn health(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let database = app_state.db().health_check().await;
    let healthy = app_state.db().is_ready() && database.is_healthy();

    let response = HealthResponse {
        status: if healthy { "OK" } else { "DEGRADED" },
        timestamp: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        uptime_secs: app_state.uptime().as_secs(),
        database,
        version: APP_VERSION,
        environment: app_state.env.as_str(),
    };

    if healthy {
        Ok(HttpResponse::Ok().json(response))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(response))
    }
}
