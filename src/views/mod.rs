//! Panel View State
//!
//! The two panels hold a local copy of remote rows, apply user actions
//! optimistically, and reconcile on the next poll or pushed change:
//!
//! - [`ChecklistView`]: one partner's task list and the room's coin balance
//! - [`PetView`]: the room's cat, its meters, coin-priced actions and decay
//!
//! Every state change that alters a view's snapshot is announced as a
//! [`ViewUpdate`] on the view's broadcast channel.

mod checklist;
mod pet;

pub use checklist::{ChecklistSnapshot, ChecklistView};
pub use pet::{ActionSpec, Animation, PetAction, PetSnapshot, PetView, Sound};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::backend::{BackendError, Side, TaskId};

/// Capacity of a view update channel
pub const UPDATE_CAPACITY: usize = 64;

/// A new snapshot of one panel
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    Checklist(ChecklistSnapshot),
    Pet(PetSnapshot),
}

impl ViewUpdate {
    pub fn room(&self) -> &str {
        match self {
            ViewUpdate::Checklist(s) => &s.room,
            ViewUpdate::Pet(s) => &s.room,
        }
    }

    /// The checklist side, for checklist updates
    pub fn side(&self) -> Option<Side> {
        match self {
            ViewUpdate::Checklist(s) => Some(s.side),
            ViewUpdate::Pet(_) => None,
        }
    }
}

/// Fresh update channel for a standalone view
pub fn update_channel() -> broadcast::Sender<ViewUpdate> {
    broadcast::channel(UPDATE_CAPACITY).0
}

/// Errors surfaced by panel actions
#[derive(Error, Debug)]
pub enum ViewError {
    /// User input rejected before reaching the backend
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Balance too low for an action; nothing was written
    #[error("Not enough coins! (balance {balance}, price {price})")]
    InsufficientCoins { balance: i64, price: i64 },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Result type for view operations
pub type ViewResult<T> = Result<T, ViewError>;
