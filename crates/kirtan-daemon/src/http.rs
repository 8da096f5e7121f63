//! HTTP control surface.
//!
//! The endpoints map 1:1 onto [`PlayerCommand`]s and forward them into the
//! player's event channel; `/api/state` serves the published snapshot.
//! CORS is open so a browser UI can poll and drive the player directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use kirtan_core::player::{PlayerCommand, PlayerEvent, StateSnapshot};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    snapshot: Arc<RwLock<StateSnapshot>>,
    event_tx: mpsc::Sender<PlayerEvent>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    snapshot: Arc<RwLock<StateSnapshot>>,
    event_tx: mpsc::Sender<PlayerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app_state = HttpState { snapshot, event_tx };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/api/state", get(get_state))
            .route("/api/select/:id", get(select_stream).post(select_stream))
            .route("/api/toggle", get(toggle).post(toggle))
            .route("/api/play", get(play).post(play))
            .route("/api/pause", get(pause).post(pause))
            .route("/api/volume/:volume", get(set_volume).post(set_volume))
            .route("/api/schedule/:enabled", get(set_schedule).post(set_schedule))
            .layer(cors)
            .with_state(app_state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn forward(state: &HttpState, cmd: PlayerCommand) -> StatusCode {
    if state
        .event_tx
        .send(PlayerEvent::Command(cmd))
        .await
        .is_err()
    {
        error!("player event channel closed");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<StateSnapshot> {
    Json(state.snapshot.read().await.clone())
}

async fn select_stream(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: select stream '{}'", id);
    forward(&state, PlayerCommand::Select { id, manual: true }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: toggle playback");
    forward(&state, PlayerCommand::TogglePlayback).await
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: play");
    forward(&state, PlayerCommand::Play).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: pause");
    forward(&state, PlayerCommand::Pause).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let vol = (volume as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: set volume to {}%", volume);
    forward(&state, PlayerCommand::SetVolume(vol)).await
}

async fn set_schedule(State(state): State<HttpState>, Path(enabled): Path<String>) -> StatusCode {
    let on = matches!(enabled.as_str(), "on" | "true" | "1");
    info!("HTTP API: auto-schedule {}", if on { "on" } else { "off" });
    forward(&state, PlayerCommand::SetAutoSchedule(on)).await
}
