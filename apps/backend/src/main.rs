use actix_web::{web, App, HttpServer};
use einfo_backend::config::db::{DbConfig, RuntimeEnv};
use einfo_backend::config::server::ServerConfig;
use einfo_backend::infra::state::{build_state, spawn_db_recovery, DB_RECOVERY_INTERVAL};
use einfo_backend::routes;
use tracing::{error, info};

mod telemetry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // A missing .env file is fine; the runtime environment may set everything.
    dotenvy::dotenv().ok();

    let runtime_env = RuntimeEnv::from_env();
    telemetry::init_tracing(runtime_env);

    let db_config = match DbConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid database configuration: {e}");
            std::process::exit(1);
        }
    };
    let server = match ServerConfig::from_env(runtime_env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid server configuration: {e}");
            std::process::exit(1);
        }
    };

    let app_state = match build_state()
        .with_db(db_config)
        .allow_degraded(server.allow_degraded_start)
        .build()
        .await
    {
        Ok(state) => state,
        Err(e) => {
            eprintln!("❌ Failed to build application state: {e}");
            std::process::exit(1);
        }
    };

    info!(
        host = %server.host,
        port = server.port,
        env = %runtime_env,
        strategy = ?app_state.db().strategy(),
        "server=starting"
    );

    let recovery = (!app_state.db().is_ready())
        .then(|| spawn_db_recovery(app_state.db.clone(), DB_RECOVERY_INTERVAL));

    let data = web::Data::new(app_state.clone());

    let result = match HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(routes::configure)
            .default_service(web::route().to(routes::not_found))
    })
    .bind((server.host.as_str(), server.port))
    {
        Ok(bound) => bound.run().await,
        Err(e) => {
            error!(host = %server.host, port = server.port, error = %e, "server=bind_failed");
            Err(e)
        }
    };

    // The database is released however the server ended.
    if let Some(handle) = recovery {
        handle.abort();
    }
    app_state.db().shutdown().await;
    info!("server=stopped");
    result
}
