//! Task Routes
//!
//! - GET /api/v1/rooms/:room/sides/:side/tasks - Checklist snapshot
//! - POST /api/v1/rooms/:room/sides/:side/tasks - Add a task
//! - POST /api/v1/rooms/:room/sides/:side/tasks/:id/toggle - Flip done
//! - DELETE /api/v1/rooms/:room/sides/:side/tasks/:id - Archive a task
//! - GET /api/v1/rooms/:room/coins - Room balance

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::{CoinsResponse, CreateTaskRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::backend::{Side, TaskId};
use crate::views::{ChecklistSnapshot, ChecklistView};

fn parse_side(side: &str) -> ApiResult<Side> {
    side.parse().map_err(ApiError::Validation)
}

async fn checklist(state: &AppState, room: &str, side: &str) -> ApiResult<Arc<ChecklistView>> {
    let side = parse_side(side)?;
    let room = state.registry.get_or_start(room).await?;
    Ok(Arc::clone(room.checklist(side)))
}

/// GET /api/v1/rooms/:room/sides/:side/tasks
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Path((room, side)): Path<(String, String)>,
) -> ApiResult<Json<ChecklistSnapshot>> {
    let view = checklist(&state, &room, &side).await?;
    Ok(Json(view.snapshot().await))
}

/// POST /api/v1/rooms/:room/sides/:side/tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Path((room, side)): Path<(String, String)>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ChecklistSnapshot>)> {
    let Json(req) = payload?;
    let view = checklist(&state, &room, &side).await?;
    view.add_task(&req.title, req.reward).await?;
    Ok((StatusCode::CREATED, Json(view.snapshot().await)))
}

/// POST /api/v1/rooms/:room/sides/:side/tasks/:id/toggle
pub async fn toggle_task(
    State(state): State<Arc<AppState>>,
    Path((room, side, id)): Path<(String, String, String)>,
) -> ApiResult<Json<ChecklistSnapshot>> {
    let view = checklist(&state, &room, &side).await?;
    view.toggle_done(&TaskId::new(id)).await?;
    Ok(Json(view.snapshot().await))
}

/// DELETE /api/v1/rooms/:room/sides/:side/tasks/:id
///
/// Archives the row; its reward keeps counting toward the balance.
pub async fn archive_task(
    State(state): State<Arc<AppState>>,
    Path((room, side, id)): Path<(String, String, String)>,
) -> ApiResult<Json<ChecklistSnapshot>> {
    let view = checklist(&state, &room, &side).await?;
    view.remove_task(&TaskId::new(id)).await?;
    Ok(Json(view.snapshot().await))
}

/// GET /api/v1/rooms/:room/coins
pub async fn get_coins(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> ApiResult<Json<CoinsResponse>> {
    let room = state.registry.get_or_start(&room).await?;
    let coins = state.backend.coins_for_room(room.name()).await?;

    Ok(Json(CoinsResponse {
        room: room.name().to_string(),
        coins,
    }))
}
