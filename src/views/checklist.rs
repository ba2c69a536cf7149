//! Checklist View
//!
//! One partner's side of the room: visible tasks in creation order plus the
//! shared coin balance. Toggles and removals are applied locally first and
//! written afterwards; the next refresh replaces the list wholesale, which is
//! what reconciles any optimistic guess that turned out wrong.

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use super::{update_channel, ViewError, ViewResult, ViewUpdate};
use crate::backend::{ChangeEvent, NewTask, SharedBackend, Side, Task, TaskId};

/// Renderable state of a checklist panel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecklistSnapshot {
    pub room: String,
    pub side: Side,
    pub label: String,
    pub coins: i64,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Default)]
struct ChecklistState {
    tasks: Vec<Task>,
    coins: i64,
    /// Most recent failed write, cleared by the next successful refresh
    last_error: Option<String>,
    last_published: Option<ChecklistSnapshot>,
}

/// Task list for one side of a room
pub struct ChecklistView {
    backend: SharedBackend,
    room: String,
    side: Side,
    label: String,
    state: RwLock<ChecklistState>,
    updates: broadcast::Sender<ViewUpdate>,
}

impl ChecklistView {
    pub fn new(
        backend: SharedBackend,
        room: impl Into<String>,
        side: Side,
        label: impl Into<String>,
    ) -> Self {
        Self::with_updates(backend, room, side, label, update_channel())
    }

    /// Create a view that announces changes on an existing channel
    pub fn with_updates(
        backend: SharedBackend,
        room: impl Into<String>,
        side: Side,
        label: impl Into<String>,
        updates: broadcast::Sender<ViewUpdate>,
    ) -> Self {
        Self {
            backend,
            room: room.into(),
            side,
            label: label.into(),
            state: RwLock::new(ChecklistState::default()),
            updates,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.updates.subscribe()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    pub async fn snapshot(&self) -> ChecklistSnapshot {
        let state = self.state.read().await;
        self.build_snapshot(&state)
    }

    fn build_snapshot(&self, state: &ChecklistState) -> ChecklistSnapshot {
        ChecklistSnapshot {
            room: self.room.clone(),
            side: self.side,
            label: self.label.clone(),
            coins: state.coins,
            tasks: state.tasks.clone(),
        }
    }

    /// Announce the current snapshot if it differs from the last one sent
    fn publish_locked(&self, state: &mut ChecklistState) {
        let snapshot = self.build_snapshot(state);
        if state.last_published.as_ref() == Some(&snapshot) {
            return;
        }
        state.last_published = Some(snapshot.clone());
        let _ = self.updates.send(ViewUpdate::Checklist(snapshot));
    }

    /// Re-fetch the visible list and the room balance
    pub async fn refresh(&self) -> ViewResult<()> {
        let tasks = self.backend.list_tasks(&self.room, self.side).await?;
        {
            let mut state = self.state.write().await;
            state.tasks = tasks;
            state.last_error = None;
            self.publish_locked(&mut state);
        }

        self.refresh_coins().await
    }

    pub async fn refresh_coins(&self) -> ViewResult<()> {
        let coins = self.backend.coins_for_room(&self.room).await?;

        let mut state = self.state.write().await;
        state.coins = coins;
        self.publish_locked(&mut state);
        Ok(())
    }

    /// Insert a task on this side and re-fetch the list
    pub async fn add_task(&self, title: &str, reward: i64) -> ViewResult<()> {
        let task =
            NewTask::new(self.room.clone(), self.side, title, reward).map_err(ViewError::Validation)?;

        self.backend.insert_task(&task).await?;
        tracing::info!(room = %self.room, side = %self.side, title = %task.title, reward, "Added task");

        self.refresh().await
    }

    /// Flip a task's done flag; the balance follows after the write lands
    pub async fn toggle_done(&self, id: &TaskId) -> ViewResult<()> {
        let done = {
            let mut state = self.state.write().await;
            let task = state
                .tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| ViewError::TaskNotFound(id.clone()))?;
            task.done = !task.done;
            let done = task.done;
            self.publish_locked(&mut state);
            done
        };

        if let Err(e) = self.backend.set_task_done(id, done).await {
            tracing::warn!(room = %self.room, task_id = %id, error = %e, "Toggle failed, reverting");
            let mut state = self.state.write().await;
            if let Some(task) = state.tasks.iter_mut().find(|t| &t.id == id) {
                if task.done == done {
                    task.done = !done;
                }
            }
            state.last_error = Some(e.to_string());
            self.publish_locked(&mut state);
            return Err(e.into());
        }

        tracing::debug!(room = %self.room, task_id = %id, done, "Toggled task");
        self.refresh_coins().await
    }

    /// Hide a task and archive it remotely
    ///
    /// Archived rows keep counting toward the balance, so coins are not
    /// refreshed here.
    pub async fn remove_task(&self, id: &TaskId) -> ViewResult<()> {
        {
            let mut state = self.state.write().await;
            let before = state.tasks.len();
            state.tasks.retain(|t| &t.id != id);
            if state.tasks.len() == before {
                return Err(ViewError::TaskNotFound(id.clone()));
            }
            self.publish_locked(&mut state);
        }

        if let Err(e) = self.backend.archive_task(id).await {
            tracing::warn!(room = %self.room, task_id = %id, error = %e, "Archive failed, next poll restores the row");
            self.state.write().await.last_error = Some(e.to_string());
            return Err(e.into());
        }
        tracing::info!(room = %self.room, side = %self.side, task_id = %id, "Archived task");
        Ok(())
    }

    /// Apply a pushed row change; returns whether the list changed
    pub async fn apply_change(&self, event: &ChangeEvent) -> bool {
        let mut state = self.state.write().await;
        let before = state.tasks.clone();

        match event {
            ChangeEvent::TaskInserted(task) => {
                if self.owns(task) && !state.tasks.iter().any(|t| t.id == task.id) {
                    state.tasks.push(task.clone());
                    state.tasks.sort_by_key(|t| t.created_at);
                }
            }
            ChangeEvent::TaskUpdated(task) => {
                let position = state.tasks.iter().position(|t| t.id == task.id);
                match (position, self.owns(task)) {
                    (Some(i), true) => state.tasks[i] = task.clone(),
                    (Some(i), false) => {
                        state.tasks.remove(i);
                    }
                    (None, true) => {
                        state.tasks.push(task.clone());
                        state.tasks.sort_by_key(|t| t.created_at);
                    }
                    (None, false) => {}
                }
            }
            ChangeEvent::TaskDeleted { room, id } => {
                if room.as_deref().map_or(true, |r| r == self.room) {
                    state.tasks.retain(|t| &t.id != id);
                }
            }
            ChangeEvent::PetUpdated(_) => {}
        }

        let changed = state.tasks != before;
        if changed {
            self.publish_locked(&mut state);
        }
        changed
    }

    fn owns(&self, task: &Task) -> bool {
        task.room == self.room && task.side == self.side && !task.archived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendError, BackendResult, MemoryBackend, Pet, PetPatch};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;

    fn view(backend: Arc<MemoryBackend>, side: Side) -> ChecklistView {
        ChecklistView::new(backend, "default", side, "NA")
    }

    #[tokio::test]
    async fn test_add_and_refresh() {
        let backend = Arc::new(MemoryBackend::new());
        let left = view(Arc::clone(&backend), Side::Left);

        left.add_task("  Dishes ", 3).await.unwrap();
        left.add_task("Trash", 1).await.unwrap();

        let snap = left.snapshot().await;
        assert_eq!(snap.tasks.len(), 2);
        assert_eq!(snap.tasks[0].title, "Dishes");
        assert_eq!(snap.coins, 0);
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_input() {
        let backend = Arc::new(MemoryBackend::new());
        let left = view(Arc::clone(&backend), Side::Left);

        assert!(matches!(
            left.add_task("   ", 3).await,
            Err(ViewError::Validation(_))
        ));
        assert!(matches!(
            left.add_task("Dishes", 0).await,
            Err(ViewError::Validation(_))
        ));
        assert!(backend.all_tasks("default").await.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_updates_coins() {
        let backend = Arc::new(MemoryBackend::new());
        let left = view(Arc::clone(&backend), Side::Left);
        left.add_task("Dishes", 3).await.unwrap();
        let id = left.snapshot().await.tasks[0].id.clone();

        left.toggle_done(&id).await.unwrap();
        let snap = left.snapshot().await;
        assert!(snap.tasks[0].done);
        assert_eq!(snap.coins, 3);

        left.toggle_done(&id).await.unwrap();
        assert_eq!(left.snapshot().await.coins, 0);
    }

    #[tokio::test]
    async fn test_toggle_unknown_task() {
        let backend = Arc::new(MemoryBackend::new());
        let left = view(backend, Side::Left);
        assert!(matches!(
            left.toggle_done(&TaskId::from(99)).await,
            Err(ViewError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_hides_but_keeps_balance() {
        let backend = Arc::new(MemoryBackend::new());
        let left = view(Arc::clone(&backend), Side::Left);
        left.add_task("Dishes", 3).await.unwrap();
        let id = left.snapshot().await.tasks[0].id.clone();
        left.toggle_done(&id).await.unwrap();

        left.remove_task(&id).await.unwrap();
        assert!(left.snapshot().await.tasks.is_empty());

        left.refresh().await.unwrap();
        let snap = left.snapshot().await;
        assert!(snap.tasks.is_empty());
        assert_eq!(snap.coins, 3);
    }

    #[tokio::test]
    async fn test_apply_change_filters_side_and_room() {
        let backend = Arc::new(MemoryBackend::new());
        let left = view(Arc::clone(&backend), Side::Left);

        let task = |id: i64, room: &str, side: Side| Task {
            id: TaskId::from(id),
            room: room.to_string(),
            side,
            title: format!("task {}", id),
            reward: 1,
            done: false,
            archived: false,
            created_at: Utc::now(),
        };

        assert!(left.apply_change(&ChangeEvent::TaskInserted(task(1, "default", Side::Left))).await);
        assert!(!left.apply_change(&ChangeEvent::TaskInserted(task(1, "default", Side::Left))).await);
        assert!(!left.apply_change(&ChangeEvent::TaskInserted(task(2, "default", Side::Right))).await);
        assert!(!left.apply_change(&ChangeEvent::TaskInserted(task(3, "other", Side::Left))).await);

        let mut done = task(1, "default", Side::Left);
        done.done = true;
        assert!(left.apply_change(&ChangeEvent::TaskUpdated(done)).await);
        assert!(left.snapshot().await.tasks[0].done);

        assert!(
            left.apply_change(&ChangeEvent::TaskDeleted {
                room: Some("default".to_string()),
                id: TaskId::from(1)
            })
            .await
        );
        assert!(left.snapshot().await.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_updates_only_published_on_change() {
        let backend = Arc::new(MemoryBackend::new());
        let left = view(Arc::clone(&backend), Side::Left);
        let mut updates = left.subscribe();

        left.add_task("Dishes", 3).await.unwrap();
        assert!(matches!(updates.try_recv(), Ok(ViewUpdate::Checklist(_))));
        while updates.try_recv().is_ok() {}

        left.refresh().await.unwrap();
        assert!(updates.try_recv().is_err());
    }

    /// Backend whose task writes always fail
    struct FailingWrites(MemoryBackend);

    #[async_trait]
    impl Backend for FailingWrites {
        fn name(&self) -> &str {
            "failing"
        }
        async fn health_check(&self) -> BackendResult<()> {
            Ok(())
        }
        async fn list_tasks(&self, room: &str, side: Side) -> BackendResult<Vec<Task>> {
            self.0.list_tasks(room, side).await
        }
        async fn insert_task(&self, task: &NewTask) -> BackendResult<()> {
            self.0.insert_task(task).await
        }
        async fn set_task_done(&self, _id: &TaskId, _done: bool) -> BackendResult<()> {
            Err(BackendError::Unavailable)
        }
        async fn archive_task(&self, _id: &TaskId) -> BackendResult<()> {
            Err(BackendError::Unavailable)
        }
        async fn coins_for_room(&self, room: &str) -> BackendResult<i64> {
            self.0.coins_for_room(room).await
        }
        async fn spend_coins(&self, room: &str, price: i64) -> BackendResult<()> {
            self.0.spend_coins(room, price).await
        }
        async fn get_pet(&self, room: &str) -> BackendResult<Option<Pet>> {
            self.0.get_pet(room).await
        }
        async fn update_pet(&self, room: &str, patch: &PetPatch) -> BackendResult<()> {
            self.0.update_pet(room, patch).await
        }
        async fn subscribe(
            &self,
            _room: &str,
        ) -> BackendResult<Option<broadcast::Receiver<ChangeEvent>>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_failed_toggle_reverts() {
        let backend = Arc::new(FailingWrites(MemoryBackend::new()));
        let left = ChecklistView::new(backend, "default", Side::Left, "NA");
        left.add_task("Dishes", 3).await.unwrap();
        let id = left.snapshot().await.tasks[0].id.clone();

        assert!(left.toggle_done(&id).await.is_err());
        assert!(!left.snapshot().await.tasks[0].done);
        assert!(left.last_error().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_remove_restored_by_poll() {
        let backend = Arc::new(FailingWrites(MemoryBackend::new()));
        let left = ChecklistView::new(backend, "default", Side::Left, "NA");
        left.add_task("Dishes", 3).await.unwrap();
        let id = left.snapshot().await.tasks[0].id.clone();

        assert!(left.remove_task(&id).await.is_err());
        assert!(left.snapshot().await.tasks.is_empty());

        assert!(left.last_error().await.is_some());

        left.refresh().await.unwrap();
        assert_eq!(left.snapshot().await.tasks.len(), 1);
        assert!(left.last_error().await.is_none());
    }
}
