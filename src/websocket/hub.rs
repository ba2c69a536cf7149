//! WebSocket Connection Hub
//!
//! Tracks connections and their topic subscriptions and fans panel updates
//! out to subscribers. Topics are `tasks.{room}.{side}` and `pet.{room}`;
//! `tasks.*` and `pet.*` match every room.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::messages::{ServerMessage, WsEvent};
use crate::backend::Side;
use crate::sync::validate_room_name;

pub type ConnectionId = String;

type Connections = Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>;
type Subscriptions = Arc<RwLock<HashMap<String, HashSet<ConnectionId>>>>;

/// Connections and subscriptions of the `/ws` endpoint
pub struct ConnectionHub {
    connections: Connections,
    /// Topic → subscribed connections
    subscriptions: Subscriptions,
    config: HubConfig,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
        }
    }
}

/// Outbound queue and topics of one connection
pub struct ConnectionHandle {
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    pub subscriptions: HashSet<String>,
}

/// The topic in the exact form events are published under, if valid
///
/// Sides are accepted in any case and lowercased, so a subscription always
/// matches the topic of the events it asked for.
pub fn canonical_topic(topic: &str) -> Option<String> {
    let parts: Vec<&str> = topic.split('.').collect();
    match parts.as_slice() {
        ["tasks", "*"] | ["pet", "*"] => Some(topic.to_string()),
        ["tasks", room, side] => {
            validate_room_name(room).ok()?;
            let side: Side = side.parse().ok()?;
            Some(format!("tasks.{}.{}", room, side.as_str()))
        }
        ["pet", room] => {
            validate_room_name(room).ok()?;
            Some(topic.to_string())
        }
        _ => None,
    }
}

/// Whether a topic names something the hub publishes
pub fn is_valid_topic(topic: &str) -> bool {
    canonical_topic(topic).is_some()
}

/// Room named by a room-specific topic; wildcards name none
fn topic_room(topic: &str) -> Option<&str> {
    let mut parts = topic.split('.');
    match (parts.next(), parts.next()) {
        (Some("tasks" | "pet"), Some(room)) if room != "*" => Some(room),
        _ => None,
    }
}

/// Send an event to direct and wildcard subscribers; returns the count reached
async fn deliver(connections: &Connections, subscriptions: &Subscriptions, event: &WsEvent) -> usize {
    let subs = subscriptions.read().await;
    let connections = connections.read().await;

    let direct = subs.get(&event.topic).cloned().unwrap_or_default();
    let wildcard = event
        .topic
        .split('.')
        .next()
        .and_then(|kind| subs.get(&format!("{}.*", kind)).cloned())
        .unwrap_or_default();

    let mut sent = 0;
    for id in direct.union(&wildcard) {
        if let Some(handle) = connections.get(id) {
            if handle.sender.send(event.message.clone()).is_ok() {
                sent += 1;
            }
        }
    }
    sent
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Register a connection, unless the limit is reached
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<ConnectionId, HubError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        connections.insert(
            id.clone(),
            ConnectionHandle {
                sender,
                subscriptions: HashSet::new(),
            },
        );

        tracing::info!(connection_id = %id, "WebSocket connected");
        Ok(id)
    }

    /// Drop a connection and all of its subscriptions
    pub async fn unregister(&self, id: &str) {
        let handle = self.connections.write().await.remove(id);

        if let Some(handle) = handle {
            let mut subs = self.subscriptions.write().await;
            for topic in handle.subscriptions {
                if let Some(subscribers) = subs.get_mut(&topic) {
                    subscribers.remove(id);
                    if subscribers.is_empty() {
                        subs.remove(&topic);
                    }
                }
            }
        }

        tracing::info!(connection_id = %id, "WebSocket disconnected");
    }

    /// Subscribe to topics; invalid ones are skipped
    pub async fn subscribe(&self, id: &str, topics: Vec<String>) -> Result<Vec<String>, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections
            .get_mut(id)
            .ok_or(HubError::ConnectionNotFound)?;

        let mut subs = self.subscriptions.write().await;
        let mut subscribed = Vec::new();

        for requested in topics {
            let Some(topic) = canonical_topic(&requested) else {
                tracing::warn!(topic = %requested, "Invalid topic ignored");
                continue;
            };

            handle.subscriptions.insert(topic.clone());
            subs.entry(topic.clone()).or_default().insert(id.to_string());
            subscribed.push(topic);
        }

        tracing::debug!(connection_id = %id, topics = ?subscribed, "Subscribed to topics");
        Ok(subscribed)
    }

    pub async fn unsubscribe(&self, id: &str, topics: Vec<String>) -> Result<Vec<String>, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections
            .get_mut(id)
            .ok_or(HubError::ConnectionNotFound)?;

        let mut subs = self.subscriptions.write().await;
        let mut unsubscribed = Vec::new();

        for requested in topics {
            let topic = canonical_topic(&requested).unwrap_or(requested);
            if handle.subscriptions.remove(&topic) {
                if let Some(subscribers) = subs.get_mut(&topic) {
                    subscribers.remove(id);
                    if subscribers.is_empty() {
                        subs.remove(&topic);
                    }
                }
                unsubscribed.push(topic);
            }
        }

        tracing::debug!(connection_id = %id, topics = ?unsubscribed, "Unsubscribed from topics");
        Ok(unsubscribed)
    }

    /// Deliver an event to its subscribers now
    pub async fn broadcast(&self, event: &WsEvent) {
        let sent = deliver(&self.connections, &self.subscriptions, event).await;
        if sent > 0 {
            tracing::trace!(topic = %event.topic, subscribers = sent, "Broadcast event");
        }
    }

    pub async fn send_to(&self, id: &str, message: ServerMessage) -> Result<(), HubError> {
        let connections = self.connections.read().await;
        let handle = connections.get(id).ok_or(HubError::ConnectionNotFound)?;

        handle
            .sender
            .send(message)
            .map_err(|_| HubError::SendFailed)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Rooms at least one connection follows by name
    pub async fn watched_rooms(&self) -> HashSet<String> {
        self.subscriptions
            .read()
            .await
            .keys()
            .filter_map(|topic| topic_room(topic))
            .map(str::to_string)
            .collect()
    }

    pub async fn subscription_count(&self, topic: &str) -> usize {
        self.subscriptions
            .read()
            .await
            .get(topic)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to send message")]
    SendFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::ChecklistSnapshot;

    fn checklist_event(room: &str, side: Side) -> WsEvent {
        WsEvent::checklist(ChecklistSnapshot {
            room: room.to_string(),
            side,
            label: "NA".to_string(),
            coins: 0,
            tasks: Vec::new(),
        })
    }

    #[test]
    fn test_valid_topics() {
        assert!(is_valid_topic("tasks.default.left"));
        assert_eq!(
            canonical_topic("tasks.default.RIGHT").as_deref(),
            Some("tasks.default.right")
        );
        assert!(is_valid_topic("tasks.*"));
        assert!(is_valid_topic("pet.default"));
        assert!(is_valid_topic("pet.*"));

        assert!(!is_valid_topic(""));
        assert!(!is_valid_topic("tasks.default"));
        assert!(!is_valid_topic("tasks.default.middle"));
        assert!(!is_valid_topic("pet.a b"));
        assert!(!is_valid_topic("chat.default"));
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = hub.register(tx).await.unwrap();
        assert_eq!(hub.connection_count().await, 1);

        hub.unregister(&id).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_skips_invalid_topics() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();

        let subscribed = hub
            .subscribe(&id, vec!["pet.default".to_string(), "bogus".to_string()])
            .await
            .unwrap();
        assert_eq!(subscribed, vec!["pet.default"]);
        assert_eq!(hub.subscription_count("pet.default").await, 1);

        let unsubscribed = hub
            .unsubscribe(&id, vec!["pet.default".to_string()])
            .await
            .unwrap();
        assert_eq!(unsubscribed, vec!["pet.default"]);
        assert_eq!(hub.subscription_count("pet.default").await, 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let hub = ConnectionHub::new(HubConfig { max_connections: 1 });
        let (tx1, _) = mpsc::unbounded_channel();
        let (tx2, _) = mpsc::unbounded_channel();

        hub.register(tx1).await.unwrap();
        assert!(matches!(
            hub.register(tx2).await,
            Err(HubError::TooManyConnections(1))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_respects_side_and_room() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let id1 = hub.register(tx1).await.unwrap();
        let id2 = hub.register(tx2).await.unwrap();

        hub.subscribe(&id1, vec!["tasks.default.left".to_string()])
            .await
            .unwrap();
        hub.subscribe(&id2, vec!["tasks.other.left".to_string()])
            .await
            .unwrap();

        hub.broadcast(&checklist_event("default", Side::Left)).await;
        hub.broadcast(&checklist_event("default", Side::Right)).await;

        assert!(matches!(rx1.try_recv(), Ok(ServerMessage::Checklist { .. })));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wildcard_subscription() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();

        hub.subscribe(&id, vec!["tasks.*".to_string()]).await.unwrap();
        hub.broadcast(&checklist_event("anywhere", Side::Right)).await;

        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_mixed_case_side_still_receives_events() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();

        let subscribed = hub
            .subscribe(&id, vec!["tasks.default.RIGHT".to_string()])
            .await
            .unwrap();
        assert_eq!(subscribed, vec!["tasks.default.right"]);

        hub.broadcast(&checklist_event("default", Side::Right)).await;
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Checklist { .. })));

        let unsubscribed = hub
            .unsubscribe(&id, vec!["tasks.default.Right".to_string()])
            .await
            .unwrap();
        assert_eq!(unsubscribed, vec!["tasks.default.right"]);
    }

    #[tokio::test]
    async fn test_watched_rooms_ignores_wildcards() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();

        hub.subscribe(
            &id,
            vec![
                "pet.den".to_string(),
                "tasks.attic.left".to_string(),
                "tasks.*".to_string(),
            ],
        )
        .await
        .unwrap();

        let mut rooms: Vec<String> = hub.watched_rooms().await.into_iter().collect();
        rooms.sort();
        assert_eq!(rooms, vec!["attic", "den"]);
    }
}
