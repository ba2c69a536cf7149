//! Realtime Change Feed
//!
//! Client for the hosted service's Phoenix-channel websocket. One feed per
//! room joins a channel with `postgres_changes` bindings for the task and pet
//! tables and turns the pushed rows into [`ChangeEvent`]s.
//!
//! The feed only speeds things up: views keep polling, so a dropped or
//! misconfigured socket costs latency, never correctness.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::backend::{BackendError, BackendResult, ChangeEvent, Pet, Task, TaskId};

const FEED_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Connection settings for a feed
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub base_url: String,
    pub anon_key: String,
    pub tasks_table: String,
    pub pet_table: String,
}

/// Start a background feed for `room`
///
/// Returns the sender (so later subscribers can attach) and a first receiver.
/// The task exits once every receiver has been dropped.
pub fn spawn_feed(
    settings: FeedSettings,
    room: &str,
) -> BackendResult<(broadcast::Sender<ChangeEvent>, broadcast::Receiver<ChangeEvent>)> {
    let url = websocket_url(&settings.base_url, &settings.anon_key)?;
    let (tx, rx) = broadcast::channel(FEED_CAPACITY);

    let feed_tx = tx.clone();
    let room = room.to_string();
    tokio::spawn(async move {
        run_feed(url, settings, room, feed_tx).await;
    });

    Ok((tx, rx))
}

/// Derive the websocket endpoint from the project URL
pub fn websocket_url(base_url: &str, anon_key: &str) -> BackendResult<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| BackendError::Config(format!("invalid backend url {:?}: {}", base_url, e)))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(BackendError::Config(format!(
                "unsupported url scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| BackendError::Config(format!("cannot use scheme {} for {}", scheme, base_url)))?;

    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");

    Ok(url)
}

/// Channel topic for a room
pub fn channel_topic(room: &str) -> String {
    format!("realtime:pawpair:{}", room)
}

/// Build the `phx_join` frame with the row-change bindings
pub fn join_message(settings: &FeedSettings, room: &str, join_ref: u64) -> Value {
    let filter = format!("room=eq.{}", room);
    json!({
        "topic": channel_topic(room),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": settings.tasks_table, "filter": filter },
                    { "event": "UPDATE", "schema": "public", "table": settings.pet_table, "filter": filter },
                ]
            },
            "access_token": settings.anon_key,
        },
        "ref": join_ref.to_string(),
        "join_ref": join_ref.to_string(),
    })
}

fn heartbeat_message(msg_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
}

/// Wait before reconnect attempt `attempt` (1-based): 1s, 2s, 4s... capped
fn reconnect_delay(attempt: u32) -> Duration {
    BASE_RECONNECT_DELAY
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(5)))
        .min(MAX_RECONNECT_DELAY)
}

async fn run_feed(
    url: Url,
    settings: FeedSettings,
    room: String,
    tx: broadcast::Sender<ChangeEvent>,
) {
    let mut attempt: u32 = 0;

    loop {
        if tx.receiver_count() == 0 {
            break;
        }

        match try_connect(&url, &settings, &room, &tx, &mut attempt).await {
            Ok(()) => break,
            Err(e) => {
                attempt += 1;
                let delay = reconnect_delay(attempt);

                tracing::warn!(
                    room = %room,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Realtime feed disconnected"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    tracing::info!(room = %room, "Realtime feed stopped, no subscribers left");
}

/// Run one websocket session. `Ok(())` means every receiver is gone.
async fn try_connect(
    url: &Url,
    settings: &FeedSettings,
    room: &str,
    tx: &broadcast::Sender<ChangeEvent>,
    attempt: &mut u32,
) -> Result<(), BackendError> {
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| BackendError::Realtime(format!("connect: {}", e)))?;
    let (mut write, mut read) = ws_stream.split();

    let mut msg_ref: u64 = 1;
    let join = join_message(settings, room, msg_ref);
    write
        .send(Message::Text(join.to_string()))
        .await
        .map_err(|e| BackendError::Realtime(format!("send join: {}", e)))?;

    tracing::info!(room = %room, "Realtime feed connected");
    *attempt = 0;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // Skip the first immediate tick.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(&text, settings) {
                            tracing::debug!(room = %room, ?event, "Realtime change");
                            if tx.send(event).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(BackendError::Realtime("connection closed by server".into()));
                    }
                    Some(Err(e)) => {
                        return Err(BackendError::Realtime(format!("read error: {}", e)));
                    }
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                if tx.receiver_count() == 0 {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg_ref += 1;
                write
                    .send(Message::Text(heartbeat_message(msg_ref).to_string()))
                    .await
                    .map_err(|e| BackendError::Realtime(format!("heartbeat: {}", e)))?;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct RowChange {
    #[serde(rename = "type", alias = "eventType")]
    kind: String,
    table: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Decode one text frame into a change event, if it carries one
pub fn decode_frame(text: &str, settings: &FeedSettings) -> Option<ChangeEvent> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparseable realtime frame");
            return None;
        }
    };

    match frame.event.as_str() {
        "postgres_changes" => {}
        "phx_reply" => {
            if frame.payload.get("status").and_then(Value::as_str) == Some("error") {
                tracing::warn!(payload = %frame.payload, "Realtime channel rejected the join");
            }
            return None;
        }
        "system" | "presence_state" | "presence_diff" | "phx_close" | "phx_error" => {
            tracing::debug!(event = %frame.event, payload = %frame.payload, "Realtime control frame");
            return None;
        }
        other => {
            tracing::debug!(event = %other, "Ignoring realtime frame");
            return None;
        }
    }

    let data = frame.payload.get("data")?.clone();
    let change: RowChange = serde_json::from_value(data).ok()?;

    if change.table == settings.tasks_table {
        decode_task_change(change)
    } else if change.table == settings.pet_table {
        let record = change.record?;
        match serde_json::from_value::<Pet>(record) {
            Ok(pet) => Some(ChangeEvent::PetUpdated(pet)),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed pet row");
                None
            }
        }
    } else {
        None
    }
}

fn decode_task_change(change: RowChange) -> Option<ChangeEvent> {
    match change.kind.as_str() {
        "INSERT" => {
            let task: Task = serde_json::from_value(change.record?).ok()?;
            Some(ChangeEvent::TaskInserted(task))
        }
        "UPDATE" => {
            let task: Task = serde_json::from_value(change.record?).ok()?;
            if task.archived {
                Some(ChangeEvent::TaskDeleted {
                    room: Some(task.room),
                    id: task.id,
                })
            } else {
                Some(ChangeEvent::TaskUpdated(task))
            }
        }
        "DELETE" => {
            let old = change.old_record?;
            let id: TaskId = serde_json::from_value(old.get("id")?.clone()).ok()?;
            let room = old.get("room").and_then(Value::as_str).map(str::to_string);
            Some(ChangeEvent::TaskDeleted { room, id })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Side;

    fn settings() -> FeedSettings {
        FeedSettings {
            base_url: "https://example.supabase.co".to_string(),
            anon_key: "anon".to_string(),
            tasks_table: "tasks".to_string(),
            pet_table: "cat".to_string(),
        }
    }

    #[test]
    fn test_reconnect_delay_doubles_from_one_second() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(reconnect_delay(6), Duration::from_secs(30));
        assert_eq!(reconnect_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_websocket_url() {
        let url = websocket_url("https://example.supabase.co", "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://example.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let url = websocket_url("http://localhost:54321", "k").unwrap();
        assert!(url.as_str().starts_with("ws://localhost:54321/realtime/v1/websocket"));

        assert!(websocket_url("ftp://example.com", "k").is_err());
    }

    #[test]
    fn test_join_message_bindings() {
        let msg = join_message(&settings(), "default", 1);
        assert_eq!(msg["event"], "phx_join");
        assert_eq!(msg["topic"], "realtime:pawpair:default");

        let bindings = msg["payload"]["config"]["postgres_changes"].as_array().unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0]["table"], "tasks");
        assert_eq!(bindings[1]["table"], "cat");
        assert_eq!(bindings[1]["filter"], "room=eq.default");
    }

    #[test]
    fn test_decode_task_insert() {
        let frame = r#"{"topic":"realtime:pawpair:default","event":"postgres_changes","ref":null,
            "payload":{"ids":[1],"data":{"type":"INSERT","schema":"public","table":"tasks",
            "commit_timestamp":"2024-05-01T12:00:00Z",
            "record":{"id":5,"room":"default","side":"right","title":"Vacuum","reward":3,
            "done":false,"archived":false,"created_at":"2024-05-01T12:00:00+00:00"}}}}"#;

        match decode_frame(frame, &settings()) {
            Some(ChangeEvent::TaskInserted(task)) => {
                assert_eq!(task.id, TaskId::from(5));
                assert_eq!(task.side, Side::Right);
            }
            other => panic!("Expected TaskInserted, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_archive_as_delete() {
        let frame = r#"{"event":"postgres_changes","payload":{"data":{"type":"UPDATE","table":"tasks",
            "record":{"id":5,"room":"default","side":"left","title":"Vacuum","reward":3,
            "done":true,"archived":true,"created_at":"2024-05-01T12:00:00+00:00"}}}}"#;

        assert_eq!(
            decode_frame(frame, &settings()),
            Some(ChangeEvent::TaskDeleted {
                room: Some("default".to_string()),
                id: TaskId::from(5)
            })
        );
    }

    #[test]
    fn test_decode_pet_update() {
        let frame = r#"{"event":"postgres_changes","payload":{"data":{"type":"UPDATE","table":"cat",
            "record":{"room":"default","hunger":70,"happiness":88,"cleanliness":93,
            "born_at":"2024-04-01T00:00:00+00:00","updated_at":"2024-05-01T12:00:00+00:00"}}}}"#;

        match decode_frame(frame, &settings()) {
            Some(ChangeEvent::PetUpdated(pet)) => assert_eq!(pet.hunger, 70),
            other => panic!("Expected PetUpdated, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_ignores_control_frames() {
        let reply = r#"{"event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        assert!(decode_frame(reply, &settings()).is_none());
        assert!(decode_frame("not json", &settings()).is_none());
    }
}
