#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the sensor map application.
//!
//! Serves viewport searches over geolocated magnetometer readings, either
//! as a `GeoJSON` feature collection for the map or as a CSV export, from a
//! `PostGIS` database.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use sensor_map_config::AppConfig;
use sensor_map_database::{PostgisStore, db};
use sensor_map_search::SearchService;

/// Shared application state.
pub struct AppState {
    /// Search pipeline over the shared store.
    pub search: SearchService,
}

/// Registers the API routes. `/search` is kept alongside `/api/search` for
/// clients that predate the `/api` prefix.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/search", web::get().to(handlers::search)),
    )
    .route("/search", web::get().to(handlers::search));
}

/// Starts the sensor map API server.
///
/// Loads configuration, connects to the `PostGIS` database and starts the
/// Actix-Web HTTP server. The caller provides the async runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Error` if configuration cannot be loaded, the
/// database connection fails, or the HTTP server fails to bind or run.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = AppConfig::load_from_env().map_err(std::io::Error::other)?;

    log::info!("Connecting to database...");
    let db_conn = db::connect(&config.database)
        .await
        .map_err(std::io::Error::other)?;

    let store = PostgisStore::new(Arc::from(db_conn));
    let state = web::Data::new(AppState {
        search: SearchService::new(Arc::new(store), config.search),
    });

    let bind_addr = config.server.bind_addr;
    let port = config.server.port;

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
