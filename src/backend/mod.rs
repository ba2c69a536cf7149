//! Remote Backend Binding
//!
//! Everything durable lives in the hosted Postgres service: task rows, the
//! room's cat, the coin ledger and the change feed. This module defines the
//! [`Backend`] seam the views talk to, plus two implementations:
//!
//! - [`RestBackend`]: PostgREST tables + RPC functions over HTTP, with the
//!   realtime websocket as an optional push channel
//! - [`MemoryBackend`]: in-process stand-in with the same contract, used by
//!   tests and offline demos
//!
//! The process-wide handle is built once through [`shared::init`].

mod error;
mod memory;
mod rest;
pub mod shared;
mod types;

pub use error::{BackendError, BackendResult};
pub use memory::MemoryBackend;
pub use rest::{RestBackend, RestConfig};
pub use types::{
    clamp_meter, ChangeEvent, Meter, NewTask, Pet, PetPatch, Side, Task, TaskId, METER_MAX,
};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{BackendConfig, BackendKind};

/// Shared backend handle
pub type SharedBackend = Arc<dyn Backend>;

/// Client-visible contract of the hosted backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs and health output
    fn name(&self) -> &str;

    /// Check that the backend answers
    async fn health_check(&self) -> BackendResult<()>;

    /// Visible (non-archived) tasks of one side, oldest first
    async fn list_tasks(&self, room: &str, side: Side) -> BackendResult<Vec<Task>>;

    async fn insert_task(&self, task: &NewTask) -> BackendResult<()>;

    async fn set_task_done(&self, id: &TaskId, done: bool) -> BackendResult<()>;

    /// Soft delete: the row stays and keeps counting toward the balance
    async fn archive_task(&self, id: &TaskId) -> BackendResult<()>;

    /// Net balance: rewards of completed tasks minus coins spent
    async fn coins_for_room(&self, room: &str) -> BackendResult<i64>;

    /// Atomically debit the room's balance
    ///
    /// Fails with [`BackendError::InsufficientCoins`] without debiting
    /// anything when the balance is below `price`.
    async fn spend_coins(&self, room: &str, price: i64) -> BackendResult<()>;

    async fn get_pet(&self, room: &str) -> BackendResult<Option<Pet>>;

    async fn update_pet(&self, room: &str, patch: &PetPatch) -> BackendResult<()>;

    /// Push channel for row changes in a room, if the backend has one
    async fn subscribe(&self, room: &str) -> BackendResult<Option<broadcast::Receiver<ChangeEvent>>>;
}

/// Build a new, unshared backend from configuration
pub fn connect(config: &BackendConfig) -> BackendResult<SharedBackend> {
    match config.kind {
        BackendKind::Memory => {
            tracing::info!("Using in-memory backend");
            Ok(Arc::new(MemoryBackend::new()))
        }
        BackendKind::Rest => {
            let rest = RestConfig::from_backend_config(config)?;
            tracing::info!(url = %rest.base_url, "Using REST backend");
            Ok(Arc::new(RestBackend::new(rest)?))
        }
    }
}
