//! Application State
//!
//! Shared by every handler behind an `Arc`.

use std::sync::Arc;
use std::time::Instant;

use crate::backend::SharedBackend;
use crate::config::Config;
use crate::sync::RoomRegistry;
use crate::websocket::{ConnectionHub, HubConfig};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: SharedBackend,
    /// Running rooms and their views
    pub registry: Arc<RoomRegistry>,
    /// Browser websocket connections
    pub hub: Arc<ConnectionHub>,
    pub start_time: Instant,
}

impl AppState {
    /// State with a fresh registry and hub over `backend`
    pub fn new(config: Config, backend: SharedBackend) -> Self {
        let registry = Arc::new(RoomRegistry::new(
            Arc::clone(&backend),
            config.rooms.clone(),
            config.polling.clone(),
        ));
        let hub = Arc::new(ConnectionHub::new(HubConfig {
            max_connections: config.api.max_ws_connections,
        }));

        Self {
            config: Arc::new(config),
            backend,
            registry,
            hub,
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// The `?room=` value, or the configured default
    pub fn room_or_default(&self, room: Option<String>) -> String {
        room.filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.config.rooms.default_room.clone())
    }
}
