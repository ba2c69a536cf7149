//! Data Transfer Objects
//!
//! Request and response bodies of the JSON API. Panel snapshots are returned
//! as-is; only the shapes below are API-specific.

use serde::{Deserialize, Serialize};

// ============================================
// TASK DTOs
// ============================================

/// New task on one side of a room
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    /// Coins earned when the task is done
    pub reward: i64,
}

// ============================================
// COIN DTOs
// ============================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CoinsResponse {
    pub room: String,
    pub coins: i64,
}

// ============================================
// PAGE DTOs
// ============================================

/// `?room=` on the HTML pages
#[derive(Debug, Default, Deserialize)]
pub struct RoomQuery {
    #[serde(default)]
    pub room: Option<String>,
}

// ============================================
// HEALTH DTOs
// ============================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    /// Backend implementation in use
    pub backend: String,
    /// "ok" or the backend's error
    pub backend_status: String,
    /// Rooms currently running
    pub rooms: usize,
    /// Open websocket connections
    pub connections: usize,
    pub uptime_seconds: u64,
    pub version: String,
}
