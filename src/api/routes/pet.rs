//! Pet Routes
//!
//! - GET /api/v1/rooms/:room/pet - Pet snapshot
//! - POST /api/v1/rooms/:room/pet/actions/:action - Spend coins on an action

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::views::{PetAction, PetSnapshot};

/// GET /api/v1/rooms/:room/pet
pub async fn get_pet(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> ApiResult<Json<PetSnapshot>> {
    let room = state.registry.get_or_start(&room).await?;
    Ok(Json(room.pet().snapshot().await))
}

/// POST /api/v1/rooms/:room/pet/actions/:action
///
/// 409 `INSUFFICIENT_COINS` when the balance is below the action's price;
/// the pet is left untouched in that case.
pub async fn perform_action(
    State(state): State<Arc<AppState>>,
    Path((room, action)): Path<(String, String)>,
) -> ApiResult<Json<PetSnapshot>> {
    let action: PetAction = action.parse().map_err(ApiError::Validation)?;
    let room = state.registry.get_or_start(&room).await?;

    let snapshot = room.pet().act(action).await?;
    Ok(Json(snapshot))
}
