//! Recipebox Server - reference recipe service for offline-first clients.
//!
//! Serves the HTTP/JSON surface the engine's sync talks to: recipe writes
//! with idempotency keys, a cursor-paged change feed including tombstones,
//! and content-addressed photo storage.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;

use crate::config::Config;
use crate::db::Pool;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recipebox_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Recipebox Server on {}:{}", config.host, config.port);
    if config.auth_secret.is_none() {
        tracing::warn!("AUTH_SECRET is not set, accepting anonymous requests");
    }

    // Create database pool
    let pool = db::create_pool(&config).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    tokio::fs::create_dir_all(&config.media_dir).await?;

    // Build application state
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes(&config))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
