//! Hosted REST Backend
//!
//! HTTP client for the hosted service's PostgREST tables and RPC functions.
//! Every request carries the public API key both as `apikey` and as a bearer
//! token, which is what the service's gateway expects from anonymous clients.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

use super::error::{BackendError, BackendResult};
use super::types::{ChangeEvent, NewTask, Pet, PetPatch, Side, Task, TaskId};
use super::Backend;
use crate::config::BackendConfig;
use crate::realtime::{self, FeedSettings};

const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Configuration for the REST backend
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL (e.g., "https://xyz.supabase.co")
    pub base_url: String,
    /// Public API key
    pub anon_key: String,
    pub tasks_table: String,
    pub pet_table: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum attempts for idempotent calls
    pub max_retries: u32,
    /// Open the realtime websocket on subscribe
    pub realtime: bool,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            tasks_table: "tasks".to_string(),
            pet_table: "cat".to_string(),
            request_timeout_ms: 5000,
            max_retries: 3,
            realtime: true,
        }
    }

    pub fn from_backend_config(config: &BackendConfig) -> BackendResult<Self> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BackendError::Config("backend url is not set".to_string()))?;
        let key = config
            .anon_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| BackendError::Config("backend anon key is not set".to_string()))?;

        Ok(Self {
            tasks_table: config.tasks_table.clone(),
            pet_table: config.pet_table.clone(),
            request_timeout_ms: config.request_timeout_ms,
            max_retries: config.max_retries,
            realtime: config.realtime,
            ..Self::new(url, key)
        })
    }
}

/// PostgREST + RPC client
pub struct RestBackend {
    client: Client,
    config: RestConfig,
    /// Live realtime feeds by room, shared between subscribers
    feeds: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl RestBackend {
    /// Create a new REST backend with the given configuration
    pub fn new(config: RestConfig) -> BackendResult<Self> {
        let key = HeaderValue::from_str(&config.anon_key)
            .map_err(|e| BackendError::Config(format!("invalid API key: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.anon_key))
            .map_err(|e| BackendError::Config(format!("invalid API key: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(BackendError::Request)?;

        Ok(Self {
            client,
            config,
            feeds: Mutex::new(HashMap::new()),
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Upper bound on a server-requested wait between attempts
    fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms).min(MAX_RETRY_AFTER)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.config.base_url, function)
    }

    /// Send a request, retrying transient failures when `idempotent`
    async fn execute<F>(&self, build: F, idempotent: bool) -> BackendResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = if idempotent {
            self.config.max_retries.max(1)
        } else {
            1
        };
        let mut last_error = BackendError::Unavailable;
        // Server-requested wait before the next attempt
        let mut retry_after: Option<Duration> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                // Quadratic backoff: 200ms, 800ms, 1.8s...
                let delay = retry_after
                    .take()
                    .unwrap_or_else(|| Duration::from_millis(200 * (attempt as u64).pow(2)));
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    retry_after = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|value| value.to_str().ok())
                        .and_then(|value| value.trim().parse::<u64>().ok())
                        .map(|secs| Duration::from_secs(secs).min(self.max_retry_after()));
                    last_error = BackendError::RateLimited;
                }
                Ok(response) => {
                    let err = api_error(response).await;
                    if !err.is_transient() {
                        return Err(err);
                    }
                    last_error = err;
                }
                Err(e) => {
                    let err = BackendError::from_transport(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    last_error = err;
                }
            }

            tracing::debug!(attempt, error = %last_error, "Backend request failed, retrying");
        }

        Err(last_error)
    }

    async fn patch_rows<T: Serialize + Sync>(
        &self,
        table: &str,
        filter: &str,
        body: &T,
    ) -> BackendResult<()> {
        let url = format!("{}?{}", self.table_url(table), filter);
        self.execute(
            || {
                self.client
                    .patch(&url)
                    .header("Prefer", "return=minimal")
                    .json(body)
            },
            true,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for RestBackend {
    fn name(&self) -> &str {
        "rest"
    }

    async fn health_check(&self) -> BackendResult<()> {
        let url = format!("{}/rest/v1/", self.config.base_url);
        self.execute(|| self.client.get(&url), false).await?;
        Ok(())
    }

    async fn list_tasks(&self, room: &str, side: Side) -> BackendResult<Vec<Task>> {
        let url = format!(
            "{}?select=*&room=eq.{}&side=eq.{}&archived=eq.false&order=created_at.asc",
            self.table_url(&self.config.tasks_table),
            urlencoding::encode(room),
            side
        );

        let response = self.execute(|| self.client.get(&url), true).await?;
        let tasks: Vec<Task> = response.json().await.map_err(decode_error)?;
        Ok(tasks)
    }

    async fn insert_task(&self, task: &NewTask) -> BackendResult<()> {
        let url = self.table_url(&self.config.tasks_table);

        // A retried insert could duplicate the row
        self.execute(
            || {
                self.client
                    .post(&url)
                    .header("Prefer", "return=minimal")
                    .json(task)
            },
            false,
        )
        .await?;

        tracing::debug!(room = %task.room, side = %task.side, title = %task.title, "Inserted task");
        Ok(())
    }

    async fn set_task_done(&self, id: &TaskId, done: bool) -> BackendResult<()> {
        let filter = format!("id=eq.{}", urlencoding::encode(id.as_str()));
        self.patch_rows(
            &self.config.tasks_table,
            &filter,
            &serde_json::json!({ "done": done }),
        )
        .await
    }

    async fn archive_task(&self, id: &TaskId) -> BackendResult<()> {
        let filter = format!("id=eq.{}", urlencoding::encode(id.as_str()));
        self.patch_rows(
            &self.config.tasks_table,
            &filter,
            &serde_json::json!({ "archived": true }),
        )
        .await
    }

    async fn coins_for_room(&self, room: &str) -> BackendResult<i64> {
        let url = self.rpc_url("coins_for_room");
        let body = serde_json::json!({ "_room": room });

        let response = self
            .execute(|| self.client.post(&url).json(&body), true)
            .await?;
        let text = response.text().await.map_err(decode_error)?;
        parse_coin_value(&text)
    }

    async fn spend_coins(&self, room: &str, price: i64) -> BackendResult<()> {
        let url = self.rpc_url("spend_coins");
        let body = serde_json::json!({ "_room": room, "_price": price });

        // Debits are never retried
        let response = match self.execute(|| self.client.post(&url).json(&body), false).await {
            Ok(response) => response,
            Err(BackendError::Api { message, .. }) if mentions_insufficient(&message) => {
                return Err(BackendError::InsufficientCoins { price });
            }
            Err(e) => return Err(e),
        };

        let text = response.text().await.unwrap_or_default();
        if text.trim() == "false" {
            return Err(BackendError::InsufficientCoins { price });
        }

        tracing::info!(room = %room, price, "Spent coins");
        Ok(())
    }

    async fn get_pet(&self, room: &str) -> BackendResult<Option<Pet>> {
        let url = format!(
            "{}?select=*&room=eq.{}&limit=1",
            self.table_url(&self.config.pet_table),
            urlencoding::encode(room)
        );

        let response = self.execute(|| self.client.get(&url), true).await?;
        let rows: Vec<Pet> = response.json().await.map_err(decode_error)?;
        Ok(rows.into_iter().next())
    }

    async fn update_pet(&self, room: &str, patch: &PetPatch) -> BackendResult<()> {
        let filter = format!("room=eq.{}", urlencoding::encode(room));
        self.patch_rows(&self.config.pet_table, &filter, patch).await
    }

    async fn subscribe(
        &self,
        room: &str,
    ) -> BackendResult<Option<broadcast::Receiver<ChangeEvent>>> {
        if !self.config.realtime {
            return Ok(None);
        }

        let mut feeds = self
            .feeds
            .lock()
            .map_err(|_| BackendError::Realtime("feed registry poisoned".to_string()))?;

        // A feed with no receivers left has shut its websocket down
        if let Some(sender) = feeds.get(room) {
            if sender.receiver_count() > 0 {
                return Ok(Some(sender.subscribe()));
            }
        }

        let settings = FeedSettings {
            base_url: self.config.base_url.clone(),
            anon_key: self.config.anon_key.clone(),
            tasks_table: self.config.tasks_table.clone(),
            pet_table: self.config.pet_table.clone(),
        };
        let (sender, receiver) = realtime::spawn_feed(settings, room)?;
        feeds.insert(room.to_string(), sender);

        Ok(Some(receiver))
    }
}

fn decode_error(e: reqwest::Error) -> BackendError {
    BackendError::Decode(e.to_string())
}

/// Turn a non-success response into an API error, preferring the
/// PostgREST `message` field when the body is JSON
async fn api_error(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(text);

    BackendError::Api { status, message }
}

fn mentions_insufficient(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("insufficient") || lower.contains("not enough")
}

/// Decode the scalar returned by `coins_for_room`; null means zero
fn parse_coin_value(text: &str) -> BackendResult<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    match serde_json::from_str::<serde_json::Value>(trimmed)? {
        serde_json::Value::Null => Ok(0),
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| BackendError::Decode(format!("coin balance out of range: {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.round() as i64)
            .map_err(|e| BackendError::Decode(format!("coin balance {:?}: {}", s, e))),
        other => Err(BackendError::Decode(format!(
            "unexpected coin balance: {}",
            other
        ))),
    }
}
