//! Route table: one function per resource, nested the way a multi-resource
//! service keeps its router readable as it grows.

use super::handlers;
use super::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

/// Builds the full router for `AppState`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(beatmap_routes())
        .merge(beatmapset_routes())
        .merge(download_routes())
        .merge(status_routes())
        .with_state(state)
}

fn beatmap_routes() -> Router<Arc<AppState>> {
    Router::new().route("/b/:id", get(handlers::get_beatmap))
}

fn beatmapset_routes() -> Router<Arc<AppState>> {
    Router::new().route("/s/:id", get(handlers::get_beatmapset))
}

fn download_routes() -> Router<Arc<AppState>> {
    Router::new().route("/d/:id", get(handlers::get_download))
}

fn status_routes() -> Router<Arc<AppState>> {
    // `/` serves both the plain-text status line and the WebSocket upgrade:
    // `handlers::root` tells them apart by whether the request carries a
    // WebSocket upgrade.
    Router::new()
        .route("/", get(handlers::root))
        .route("/favicon.ico", get(handlers::favicon))
}
