//! # pawpair
//!
//! A shared two-panel checklist and a virtual cat for two people. Finished
//! chores earn coins for the room; coins buy food, baths and play for the
//! cat, whose meters slowly decay.
//!
//! State lives in a hosted Postgres REST service. This crate is the server
//! between it and the browser: it polls and subscribes to the remote rows,
//! keeps per-room panel views, and pushes rendered panels over a websocket.
//!
//! ## Modules
//!
//! - [`backend`]: the remote binding (REST or in-memory) behind one trait
//! - [`realtime`]: the push change feed client
//! - [`views`]: checklist and pet panel state with optimistic updates
//! - [`sync`]: per-room polling, decay and push listeners
//! - [`websocket`]: browser push hub
//! - [`api`]: pages, JSON API and health routes with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pawpair::backend::{MemoryBackend, Side};
//! use pawpair::views::{ChecklistView, PetAction, PetView};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!
//!     let left = ChecklistView::new(backend.clone(), "default", Side::Left, "NA");
//!     left.add_task("Dishes", 5).await?;
//!     let id = left.snapshot().await.tasks[0].id.clone();
//!     left.toggle_done(&id).await?;
//!
//!     let cat = Arc::new(PetView::new(backend, "default", Duration::from_secs(10)));
//!     let snapshot = cat.act(PetAction::Feed).await?;
//!     println!("hunger {} coins {}", snapshot.hunger, snapshot.coins);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod logging;
pub mod realtime;
pub mod sync;
pub mod views;
pub mod websocket;

pub use api::{build_router, serve, ApiError, AppState};

pub use backend::{
    Backend, BackendError, BackendResult, ChangeEvent, MemoryBackend, NewTask, Pet, PetPatch,
    RestBackend, SharedBackend, Side, Task, TaskId,
};

pub use views::{
    ChecklistSnapshot, ChecklistView, PetAction, PetSnapshot, PetView, ViewError, ViewUpdate,
};

pub use sync::{RegistryError, Room, RoomDriver, RoomRegistry};

pub use websocket::{ClientMessage, ConnectionHub, HubConfig, HubError, ServerMessage, WsEvent};

pub use config::{
    ApiConfig, BackendConfig, BackendKind, Config, ConfigError, LoggingConfig, PollingConfig,
    RoomsConfig,
};
