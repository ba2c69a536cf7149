//! WebSocket Message Types
//!
//! Client and server frames exchanged on `/ws`. Panel frames carry both the
//! snapshot and its rendered HTML, so a page can swap the panel in place.

use serde::{Deserialize, Serialize};

use crate::api::render;
use crate::views::{ChecklistSnapshot, PetSnapshot, ViewUpdate};

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to topics (e.g. "tasks.default.left", "pet.*")
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    /// Keepalive
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A checklist panel changed
    Checklist {
        snapshot: ChecklistSnapshot,
        html: String,
    },
    /// The pet panel changed
    Pet { snapshot: PetSnapshot, html: String },
    Subscribed { topics: Vec<String> },
    Unsubscribed { topics: Vec<String> },
    Pong,
    Error { message: String },
    Connected { connection_id: String },
}

/// A message addressed to a topic
#[derive(Debug, Clone)]
pub struct WsEvent {
    pub topic: String,
    pub message: ServerMessage,
}

impl WsEvent {
    pub fn checklist(snapshot: ChecklistSnapshot) -> Self {
        Self {
            topic: render::checklist_topic(&snapshot.room, snapshot.side),
            message: ServerMessage::Checklist {
                html: render::checklist_panel(&snapshot),
                snapshot,
            },
        }
    }

    pub fn pet(snapshot: PetSnapshot) -> Self {
        Self {
            topic: render::pet_topic(&snapshot.room),
            message: ServerMessage::Pet {
                html: render::pet_panel(&snapshot),
                snapshot,
            },
        }
    }
}

impl From<ViewUpdate> for WsEvent {
    fn from(update: ViewUpdate) -> Self {
        match update {
            ViewUpdate::Checklist(snapshot) => WsEvent::checklist(snapshot),
            ViewUpdate::Pet(snapshot) => WsEvent::pet(snapshot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Side;
    use crate::views::Animation;

    #[test]
    fn test_client_message_deserialize_subscribe() {
        let json = r#"{"type": "subscribe", "topics": ["tasks.default.left", "pet.default"]}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Subscribe { topics } => {
                assert_eq!(topics.len(), 2);
                assert_eq!(topics[1], "pet.default");
            }
            _ => panic!("Expected Subscribe"),
        }
    }

    #[test]
    fn test_client_message_deserialize_ping() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_checklist_event_topic_and_frame() {
        let event = WsEvent::from(ViewUpdate::Checklist(ChecklistSnapshot {
            room: "default".to_string(),
            side: Side::Right,
            label: "NK".to_string(),
            coins: 4,
            tasks: Vec::new(),
        }));
        assert_eq!(event.topic, "tasks.default.right");

        let json = serde_json::to_value(&event.message).unwrap();
        assert_eq!(json["type"], "checklist");
        assert_eq!(json["snapshot"]["side"], "right");
        assert!(json["html"].as_str().unwrap().contains("NK"));
    }

    #[test]
    fn test_pet_event_topic() {
        let event = WsEvent::pet(PetSnapshot {
            room: "den".to_string(),
            age_days: 0,
            hunger: 100,
            happiness: 100,
            cleanliness: 100,
            coins: 0,
            animation: Animation::Feed,
            sprite: Animation::Feed.sprite(),
            sound: Some("/sounds/munch.mp3".to_string()),
            action_seq: 1,
        });
        assert_eq!(event.topic, "pet.den");

        let json = serde_json::to_value(&event.message).unwrap();
        assert_eq!(json["type"], "pet");
        assert_eq!(json["snapshot"]["animation"], "feed");
    }

    #[test]
    fn test_server_message_serialize_connected() {
        let msg = ServerMessage::Connected {
            connection_id: "abc-123".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"connection_id\":\"abc-123\""));
    }
}
