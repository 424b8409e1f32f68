//! HTTP route definitions.

mod health;
mod media;
mod recipes;

use crate::config::Config;
use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes(config: &Config) -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(recipes::routes())
        .merge(media::routes(config.max_media_bytes))
}
