//! HTTP route handlers.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::ws::ws_handler;
use crate::api::RelayState;
use crate::collaborators::{CatalogVideo, RoomInfo};
use crate::error::{RoomError, RoomResult};
use crate::protocol_constants::SERVICE_ID;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    owner_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{id}", get(get_room))
        .route("/video/list", get(list_videos))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "connections": state.ws_manager.connection_count(),
        "subscriptions": state.ws_manager.subscription_count(),
        "rooms": state.rooms.len(),
    }))
}

/// Registers a room owned by `ownerId` and returns its generated id.
async fn create_room(
    State(state): State<RelayState>,
    Json(request): Json<CreateRoomRequest>,
) -> RoomResult<Json<RoomInfo>> {
    let owner_id = request.owner_id.trim();
    if owner_id.is_empty() {
        return Err(RoomError::InvalidRequest("ownerId is required".into()));
    }

    let info = RoomInfo {
        id: uuid::Uuid::new_v4().simple().to_string(),
        owner_id: Some(owner_id.to_string()),
    };
    state.rooms.insert(info.id.clone(), info.clone());
    log::info!("[Relay] Room {} created by {}", info.id, owner_id);
    Ok(Json(info))
}

async fn get_room(
    Path(id): Path<String>,
    State(state): State<RelayState>,
) -> RoomResult<Json<RoomInfo>> {
    state
        .rooms
        .get(&id)
        .map(|entry| Json(entry.value().clone()))
        .ok_or(RoomError::RoomNotFound(id))
}

async fn list_videos(State(state): State<RelayState>) -> Json<Vec<CatalogVideo>> {
    Json(state.catalog.read().clone())
}
