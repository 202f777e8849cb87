use actix_web::{web, HttpRequest};

use crate::error::AppError;

pub mod health;

/// Register every route. Shared by `main.rs` and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(health::root))
        .route("/health", web::get().to(health::health));
}

/// Fallback for unmatched paths.
pub async fn not_found(req: HttpRequest) -> Result<actix_web::HttpResponse, AppError> {
    Err(AppError::not_found(
        "NOT_FOUND",
        format!("no route for {} {}", req.method(), req.path()),
    ))
}
