//! Page Routes
//!
//! - GET / and GET /todo - Both checklist panels
//! - GET /pet - The pet panel
//!
//! `?room=` picks the room; the configured default otherwise.

use axum::{
    extract::{Query, State},
    response::Html,
};
use std::sync::Arc;

use crate::api::dto::RoomQuery;
use crate::api::error::ApiResult;
use crate::api::render;
use crate::api::state::AppState;
use crate::backend::Side;

/// GET /todo
pub async fn checklist_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoomQuery>,
) -> ApiResult<Html<String>> {
    let name = state.room_or_default(query.room);
    let room = state.registry.get_or_start(&name).await?;

    let left = room.checklist(Side::Left).snapshot().await;
    let right = room.checklist(Side::Right).snapshot().await;
    Ok(Html(render::checklist_page(room.name(), &left, &right)))
}

/// GET /pet
pub async fn pet_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoomQuery>,
) -> ApiResult<Html<String>> {
    let name = state.room_or_default(query.room);
    let room = state.registry.get_or_start(&name).await?;

    let snapshot = room.pet().snapshot().await;
    Ok(Html(render::pet_page(room.name(), &snapshot)))
}
