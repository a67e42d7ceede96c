//! The public HTTP and WebSocket surface: beatmap/beatmapset metadata,
//! beatmapset archive downloads, a status line, and a WebSocket variant of
//! the download route.
//!
//! ```text
//! GET  /b/{id}     beatmap metadata      -> JSON object
//! GET  /s/{id}     beatmapset metadata   -> JSON array
//! GET  /d/{id}     beatmapset archive    -> application/x-osu-beatmap-archive
//! GET  /           status line           -> text/plain
//! GET  /favicon.ico                      -> 204
//! WS   /           {id} in, {id,status,data,filename} out
//! ```

pub mod handlers;
pub mod routes;

use crate::config::Config;
use crate::metadata::MetadataFetcher;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Everything a handler needs, shared behind `Arc`s constructed once at
/// startup and never rediscovered via static lookup.
pub struct AppState {
    pub pipeline: Pipeline,
    pub metadata: MetadataFetcher,
    pub config: Config,
    pub started_at: Instant,
}

/// Builds the top-level router, wired with tracing and permissive CORS.
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Binds `state.config.bind_address` and serves the router until a shutdown
/// signal (SIGINT/SIGTERM) arrives.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.bind_address.clone();
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
