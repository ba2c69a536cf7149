//! WebSocket Panel Push
//!
//! Browsers connect to `/ws` and subscribe to the panels they display:
//!
//! - `tasks.{room}.{side}` - one checklist panel (`side` is `left` or `right`)
//! - `pet.{room}` - the pet panel
//! - `tasks.*` / `pet.*` - every room
//!
//! Each panel change arrives as a `checklist` or `pet` frame holding the
//! snapshot and the panel's rendered HTML.
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:3000/ws');
//! ws.onopen = () => ws.send(JSON.stringify({type: 'subscribe', topics: ['pet.default']}));
//! ws.onmessage = (event) => console.log(JSON.parse(event.data));
//! ```

mod handler;
mod hub;
mod messages;

pub use handler::websocket_handler;
pub use hub::{canonical_topic, is_valid_topic, ConnectionHub, HubConfig, HubError};
pub use messages::{ClientMessage, ServerMessage, WsEvent};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::sync::RoomRegistry;
use crate::views::ViewUpdate;

const MAX_REAP_PERIOD: Duration = Duration::from_secs(60);

/// Forward view updates to the hub until the update channel closes
pub fn forward_updates(
    hub: Arc<ConnectionHub>,
    mut updates: broadcast::Receiver<ViewUpdate>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => hub.broadcast(&WsEvent::from(update)).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Panel updates lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Periodically stop rooms idle for `max_idle` that no browser is watching
pub fn reap_idle_rooms(
    registry: Arc<RoomRegistry>,
    hub: Arc<ConnectionHub>,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    let mut interval = tokio::time::interval(max_idle.min(MAX_REAP_PERIOD));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::spawn(async move {
        loop {
            interval.tick().await;
            let watched = hub.watched_rooms().await;
            let stopped = registry.evict_idle(max_idle, &watched).await;
            if !stopped.is_empty() {
                tracing::debug!(rooms = ?stopped, "Reaped idle rooms");
            }
        }
    })
}
