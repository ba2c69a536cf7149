//! In-Memory Backend
//!
//! Stand-in for the hosted service that keeps rows in process memory. It
//! honors the same contract as the REST backend (archived rows still count,
//! debits are atomic, every mutation is pushed on the change feed) so views
//! can be exercised without a network.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};

use super::error::{BackendError, BackendResult};
use super::types::{ChangeEvent, NewTask, Pet, PetPatch, Side, Task, TaskId};
use super::Backend;

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    tasks: Vec<Task>,
    /// Coins spent per room
    spent: HashMap<String, i64>,
    pets: HashMap<String, Pet>,
}

impl MemoryState {
    fn balance(&self, room: &str) -> i64 {
        let earned: i64 = self
            .tasks
            .iter()
            .filter(|t| t.room == room && t.done)
            .map(|t| t.reward)
            .sum();
        earned - self.spent.get(room).copied().unwrap_or(0)
    }

    fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }
}

/// Process-local backend
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
            events,
        }
    }

    /// Replace (or create) a room's pet row
    pub async fn put_pet(&self, pet: Pet) {
        self.state.lock().await.pets.insert(pet.room.clone(), pet);
    }

    /// All rows of a room, archived ones included
    pub async fn all_tasks(&self, room: &str) -> Vec<Task> {
        self.state
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| t.room == room)
            .cloned()
            .collect()
    }

    fn emit(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn list_tasks(&self, room: &str, side: Side) -> BackendResult<Vec<Task>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| t.room == room && t.side == side && !t.archived)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn insert_task(&self, task: &NewTask) -> BackendResult<()> {
        let row = {
            let mut state = self.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;

            let row = Task {
                id: TaskId::from(id),
                room: task.room.clone(),
                side: task.side,
                title: task.title.clone(),
                reward: task.reward,
                done: false,
                archived: false,
                created_at: Utc::now(),
            };
            state.tasks.push(row.clone());
            row
        };

        self.emit(ChangeEvent::TaskInserted(row));
        Ok(())
    }

    async fn set_task_done(&self, id: &TaskId, done: bool) -> BackendResult<()> {
        let row = {
            let mut state = self.state.lock().await;
            // Like a PostgREST PATCH, an unmatched filter is not an error
            match state.task_mut(id) {
                Some(task) => {
                    task.done = done;
                    task.clone()
                }
                None => return Ok(()),
            }
        };

        if row.archived {
            self.emit(ChangeEvent::TaskDeleted {
                room: Some(row.room),
                id: row.id,
            });
        } else {
            self.emit(ChangeEvent::TaskUpdated(row));
        }
        Ok(())
    }

    async fn archive_task(&self, id: &TaskId) -> BackendResult<()> {
        let room = {
            let mut state = self.state.lock().await;
            match state.task_mut(id) {
                Some(task) => {
                    task.archived = true;
                    task.room.clone()
                }
                None => return Ok(()),
            }
        };

        self.emit(ChangeEvent::TaskDeleted {
            room: Some(room),
            id: id.clone(),
        });
        Ok(())
    }

    async fn coins_for_room(&self, room: &str) -> BackendResult<i64> {
        Ok(self.state.lock().await.balance(room))
    }

    async fn spend_coins(&self, room: &str, price: i64) -> BackendResult<()> {
        if price <= 0 {
            return Err(BackendError::Api {
                status: 400,
                message: format!("price must be positive, got {}", price),
            });
        }

        let mut state = self.state.lock().await;
        if state.balance(room) < price {
            return Err(BackendError::InsufficientCoins { price });
        }
        *state.spent.entry(room.to_string()).or_insert(0) += price;
        Ok(())
    }

    async fn get_pet(&self, room: &str) -> BackendResult<Option<Pet>> {
        // Rooms start with a full-meter cat, like a seeded table
        let mut state = self.state.lock().await;
        let pet = state
            .pets
            .entry(room.to_string())
            .or_insert_with(|| Pet::fresh(room, Utc::now()));
        Ok(Some(pet.clone()))
    }

    async fn update_pet(&self, room: &str, patch: &PetPatch) -> BackendResult<()> {
        let pet = {
            let mut state = self.state.lock().await;
            match state.pets.get_mut(room) {
                Some(pet) => {
                    pet.apply(patch);
                    pet.clone()
                }
                None => return Ok(()),
            }
        };

        self.emit(ChangeEvent::PetUpdated(pet));
        Ok(())
    }

    async fn subscribe(
        &self,
        _room: &str,
    ) -> BackendResult<Option<broadcast::Receiver<ChangeEvent>>> {
        Ok(Some(self.events.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Meter;

    async fn add(backend: &MemoryBackend, side: Side, title: &str, reward: i64) -> TaskId {
        backend
            .insert_task(&NewTask::new("default", side, title, reward).unwrap())
            .await
            .unwrap();
        backend
            .list_tasks("default", side)
            .await
            .unwrap()
            .last()
            .unwrap()
            .id
            .clone()
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let backend = MemoryBackend::new();
        let a = add(&backend, Side::Left, "Dishes", 2).await;
        let _b = add(&backend, Side::Right, "Laundry", 3).await;
        let c = add(&backend, Side::Left, "Trash", 1).await;

        let left = backend.list_tasks("default", Side::Left).await.unwrap();
        assert_eq!(left.iter().map(|t| t.id.clone()).collect::<Vec<_>>(), vec![a, c]);
        assert!(backend.list_tasks("other", Side::Left).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_balance_counts_archived_done_tasks() {
        let backend = MemoryBackend::new();
        let id = add(&backend, Side::Left, "Dishes", 4).await;

        assert_eq!(backend.coins_for_room("default").await.unwrap(), 0);
        backend.set_task_done(&id, true).await.unwrap();
        assert_eq!(backend.coins_for_room("default").await.unwrap(), 4);

        backend.archive_task(&id).await.unwrap();
        assert!(backend.list_tasks("default", Side::Left).await.unwrap().is_empty());
        assert_eq!(backend.coins_for_room("default").await.unwrap(), 4);
        assert_eq!(backend.all_tasks("default").await.len(), 1);
    }

    #[tokio::test]
    async fn test_spend_is_atomic() {
        let backend = MemoryBackend::new();
        let id = add(&backend, Side::Right, "Cook", 5).await;
        backend.set_task_done(&id, true).await.unwrap();

        let err = backend.spend_coins("default", 6).await.unwrap_err();
        assert!(matches!(err, BackendError::InsufficientCoins { price: 6 }));
        assert_eq!(backend.coins_for_room("default").await.unwrap(), 5);

        backend.spend_coins("default", 5).await.unwrap();
        assert_eq!(backend.coins_for_room("default").await.unwrap(), 0);
        assert!(backend.spend_coins("default", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_pet_patch_and_feed() {
        let backend = MemoryBackend::new();
        let mut feed = backend.subscribe("default").await.unwrap().unwrap();

        let pet = backend.get_pet("default").await.unwrap().unwrap();
        assert_eq!(pet.hunger, 100);

        let patch = PetPatch::new(Utc::now()).set(Meter::Hunger, 60);
        backend.update_pet("default", &patch).await.unwrap();

        match feed.recv().await.unwrap() {
            ChangeEvent::PetUpdated(pet) => assert_eq!(pet.hunger, 60),
            other => panic!("Expected PetUpdated, got {:?}", other),
        }
    }
}
