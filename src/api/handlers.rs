//! Handler functions for every route in the table.

use super::AppState;
use crate::error::AppError;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use std::sync::Arc;

/// `GET /b/{id}` — single beatmap metadata.
pub async fn get_beatmap(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let value = state
        .metadata
        .download_beatmap(&state.pipeline.limiter, &state.pipeline.db, id)
        .await?;
    Ok(Json(value))
}

/// `GET /s/{id}` — beatmapset metadata, every contained beatmap.
pub async fn get_beatmapset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<serde_json::Value>>, AppError> {
    let values = state
        .metadata
        .download_beatmapset(&state.pipeline.limiter, &state.pipeline.db, id)
        .await?;
    Ok(Json(values))
}

/// `GET /d/{id}` — the beatmapset archive itself.
pub async fn get_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let downloaded = state.pipeline.download(id).await?;
    let disposition = format!("attachment; filename=\"{}\"", downloaded.filename);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/x-osu-beatmap-archive".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        downloaded.payload,
    )
        .into_response())
}

/// `GET /` — a human-readable status line, or a WebSocket upgrade.
pub async fn root(
    State(state): State<Arc<AppState>>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    match ws {
        Some(upgrade) => upgrade.on_upgrade(move |socket| handle_socket(socket, state)),
        None => status(State(state)).await.into_response(),
    }
}

/// Human-readable uptime/occupancy line served at `/`.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let line = format!(
        "{} v{} — uptime {}s, upstream {}, cached {}\n",
        crate::NAME,
        crate::VERSION,
        uptime,
        if state.pipeline.upstream.is_some() { "enabled" } else { "disabled" },
        state.pipeline.lru.len(),
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], line)
}

/// `GET /favicon.ico` — empty, 204.
pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(serde::Serialize)]
struct WsResponse {
    id: i64,
    status: u16,
    data: String,
    filename: String,
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(id) = text.trim().parse::<i64>() else {
            continue;
        };

        let response = match state.pipeline.download(id).await {
            Ok(downloaded) => WsResponse {
                id,
                status: 200,
                data: base64::engine::general_purpose::STANDARD.encode(&downloaded.payload),
                filename: downloaded.filename,
            },
            Err(err) => WsResponse {
                id,
                status: err.status().as_u16(),
                data: String::new(),
                filename: String::new(),
            },
        };

        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(_) => continue,
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}
