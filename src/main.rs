use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use tokio::runtime::Handle;

#[macro_use]
mod db;

mod api;
mod config;
mod docs;
mod error;
mod lifecycle;
mod model;
mod routes;
mod services;
mod utils;

use config::Config;
use lifecycle::AppState;
use routes::RateLimits;

use crate::docs::ApiDoc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = Config::from_env();

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_names(true)
        .pretty()
        .init();

    info!(addr = %config.server_addr, db = %config.database_path.display(), "Server starting...");

    let state = match AppState::init(config.clone()).await {
        Ok(state) => Data::new(state),
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(std::io::Error::other(e.to_string()));
        }
    };

    state.warm_cache().await;
    state.start_background_tasks(Handle::current());

    let limits = RateLimits::from_config(&config);
    let server_addr = config.server_addr.clone();
    let app_state = state.clone();

    let served = HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard so JS/CSS assets match
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(app_state.clone())
            .configure(|cfg| routes::configure(cfg, &config, &limits))
    })
    .bind(server_addr)?
    .run()
    .await;

    state.shutdown().await;
    served
}
