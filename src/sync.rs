//! Room Driver
//!
//! Keeps each room's views current. A room is polled on fixed intervals
//! (tasks, pet, coins), its cat decays on a slower clock, and when the
//! backend offers a change feed, pushed rows are applied as they arrive.
//! Polling continues alongside the feed and is what repairs any drift.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::{ChangeEvent, SharedBackend, Side};
use crate::config::{PollingConfig, RoomsConfig};
use crate::views::{ChecklistView, PetView, ViewUpdate};

/// Capacity of the registry-wide update channel
const ROOM_UPDATE_CAPACITY: usize = 256;

const MAX_ROOM_NAME_LEN: usize = 64;

/// Errors from the room registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Invalid room name: {0}")]
    InvalidRoom(String),

    #[error("Room limit reached ({0})")]
    TooManyRooms(usize),
}

/// Room names end up in topic strings and URLs
pub fn validate_room_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_ROOM_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidRoom(name.to_string()))
    }
}

/// The three panels of one room
pub struct Room {
    name: String,
    left: Arc<ChecklistView>,
    right: Arc<ChecklistView>,
    pet: Arc<PetView>,
    updates: broadcast::Sender<ViewUpdate>,
}

impl Room {
    pub fn new(
        backend: SharedBackend,
        name: impl Into<String>,
        rooms: &RoomsConfig,
        animation_hold: Duration,
        updates: broadcast::Sender<ViewUpdate>,
    ) -> Self {
        let name = name.into();
        let checklist = |side: Side| {
            Arc::new(ChecklistView::with_updates(
                Arc::clone(&backend),
                name.clone(),
                side,
                rooms.label_for(side),
                updates.clone(),
            ))
        };

        Self {
            left: checklist(Side::Left),
            right: checklist(Side::Right),
            pet: Arc::new(PetView::with_updates(
                Arc::clone(&backend),
                name.clone(),
                animation_hold,
                updates.clone(),
            )),
            name,
            updates,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checklist(&self, side: Side) -> &Arc<ChecklistView> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn pet(&self) -> &Arc<PetView> {
        &self.pet
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.updates.subscribe()
    }

    /// Poll everything once; failures are logged, not returned
    pub async fn refresh_all(&self) {
        for side in Side::ALL {
            if let Err(e) = self.checklist(side).refresh().await {
                tracing::warn!(room = %self.name, %side, error = %e, "Checklist refresh failed");
            }
        }
        if let Err(e) = self.pet.refresh_pet().await {
            tracing::warn!(room = %self.name, error = %e, "Pet refresh failed");
        }
        if let Err(e) = self.pet.refresh_coins().await {
            tracing::warn!(room = %self.name, error = %e, "Coin refresh failed");
        }
    }

    /// Route a pushed change to the panels it concerns
    pub async fn apply_change(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::PetUpdated(_) => {
                self.pet.apply_change(event).await;
            }
            _ => {
                let mut touched = false;
                for side in Side::ALL {
                    touched |= self.checklist(side).apply_change(event).await;
                }
                // Done flags move the balance; the feed carries no coin rows
                if touched {
                    for side in Side::ALL {
                        if let Err(e) = self.checklist(side).refresh_coins().await {
                            tracing::debug!(room = %self.name, error = %e, "Coin refresh after push failed");
                        }
                    }
                    if let Err(e) = self.pet.refresh_coins().await {
                        tracing::debug!(room = %self.name, error = %e, "Coin refresh after push failed");
                    }
                }
            }
        }
    }
}

/// Background tasks keeping one room current
pub struct RoomDriver {
    room: Arc<Room>,
    handles: Vec<JoinHandle<()>>,
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

impl RoomDriver {
    /// Spawn the polling loops, the decay clock and the push listener
    pub async fn start(room: Arc<Room>, backend: SharedBackend, polling: &PollingConfig) -> Self {
        let mut handles = Vec::new();

        // Tasks and the checklist balance
        {
            let room = Arc::clone(&room);
            let mut interval = ticker(polling.tasks_interval());
            handles.push(tokio::spawn(async move {
                loop {
                    interval.tick().await;
                    for side in Side::ALL {
                        if let Err(e) = room.checklist(side).refresh().await {
                            tracing::warn!(room = %room.name, %side, error = %e, "Task poll failed");
                        }
                    }
                }
            }));
        }

        {
            let room = Arc::clone(&room);
            let mut interval = ticker(polling.pet_interval());
            handles.push(tokio::spawn(async move {
                loop {
                    interval.tick().await;
                    if let Err(e) = room.pet.refresh_pet().await {
                        tracing::warn!(room = %room.name, error = %e, "Pet poll failed");
                    }
                }
            }));
        }

        {
            let room = Arc::clone(&room);
            let mut interval = ticker(polling.coins_interval());
            handles.push(tokio::spawn(async move {
                loop {
                    interval.tick().await;
                    if let Err(e) = room.pet.refresh_coins().await {
                        tracing::warn!(room = %room.name, error = %e, "Coin poll failed");
                    }
                }
            }));
        }

        if polling.decay_enabled {
            let room = Arc::clone(&room);
            let mut interval = ticker(polling.decay_interval());
            handles.push(tokio::spawn(async move {
                // The first tick is immediate; a fresh room should not decay on start
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = room.pet.decay_tick().await {
                        tracing::warn!(room = %room.name, error = %e, "Pet decay failed");
                    }
                }
            }));
        }

        match backend.subscribe(&room.name).await {
            Ok(Some(feed)) => {
                handles.push(tokio::spawn(listen(Arc::clone(&room), feed)));
            }
            Ok(None) => {
                tracing::debug!(room = %room.name, "No change feed, polling only");
            }
            Err(e) => {
                tracing::warn!(room = %room.name, error = %e, "Change feed unavailable, polling only");
            }
        }

        tracing::info!(room = %room.name, tasks = handles.len(), "Room driver started");
        Self { room, handles }
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn stop(&self) {
        for handle in &self.handles {
            handle.abort();
        }
        tracing::info!(room = %self.room.name, "Room driver stopped");
    }
}

impl Drop for RoomDriver {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn listen(room: Arc<Room>, mut feed: broadcast::Receiver<ChangeEvent>) {
    loop {
        match feed.recv().await {
            Ok(event) => {
                if event.room().map_or(true, |r| r == room.name) {
                    room.apply_change(&event).await;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(room = %room.name, skipped, "Change feed lagged, refreshing");
                room.refresh_all().await;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!(room = %room.name, "Change feed closed");
                break;
            }
        }
    }
}

/// A reserved room; the driver is filled in once its first refresh is done
struct RoomSlot {
    driver: OnceCell<RoomDriver>,
    /// Milliseconds since the registry epoch
    last_used: AtomicU64,
}

/// Lazily started rooms, bounded in number
///
/// The slot map lock only guards reservations. Starting a room (first
/// refresh, change feed subscription) happens outside it, so lookups of
/// running rooms never wait on a slow start.
pub struct RoomRegistry {
    backend: SharedBackend,
    rooms_config: RoomsConfig,
    polling: PollingConfig,
    slots: RwLock<HashMap<String, Arc<RoomSlot>>>,
    updates: broadcast::Sender<ViewUpdate>,
    epoch: Instant,
}

impl RoomRegistry {
    pub fn new(backend: SharedBackend, rooms_config: RoomsConfig, polling: PollingConfig) -> Self {
        let (updates, _) = broadcast::channel(ROOM_UPDATE_CAPACITY);
        Self {
            backend,
            rooms_config,
            polling,
            slots: RwLock::new(HashMap::new()),
            updates,
            epoch: Instant::now(),
        }
    }

    /// Updates from every room this registry runs
    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.updates.subscribe()
    }

    pub fn default_room(&self) -> &str {
        &self.rooms_config.default_room
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn touch(&self, slot: &RoomSlot) {
        slot.last_used.store(self.now_ms(), Ordering::Relaxed);
    }

    /// A running room, if it has finished starting
    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        let slots = self.slots.read().await;
        let slot = slots.get(name)?;
        self.touch(slot);
        slot.driver.get().map(|driver| Arc::clone(driver.room()))
    }

    /// The running room, starting it (after a first refresh) if needed
    ///
    /// Concurrent callers for the same room share one start.
    pub async fn get_or_start(&self, name: &str) -> Result<Arc<Room>, RegistryError> {
        validate_room_name(name)?;

        let slot = self.reserve(name).await?;
        self.touch(&slot);

        let driver = slot
            .driver
            .get_or_init(|| async {
                let room = Arc::new(Room::new(
                    Arc::clone(&self.backend),
                    name,
                    &self.rooms_config,
                    self.polling.animation_hold(),
                    self.updates.clone(),
                ));
                room.refresh_all().await;
                RoomDriver::start(room, Arc::clone(&self.backend), &self.polling).await
            })
            .await;

        Ok(Arc::clone(driver.room()))
    }

    /// Find or reserve the slot for a room; reservations count toward the limit
    async fn reserve(&self, name: &str) -> Result<Arc<RoomSlot>, RegistryError> {
        if let Some(slot) = self.slots.read().await.get(name) {
            return Ok(Arc::clone(slot));
        }

        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(name) {
            return Ok(Arc::clone(slot));
        }
        if slots.len() >= self.rooms_config.max_rooms {
            tracing::warn!(room = name, max = self.rooms_config.max_rooms, "Room limit reached");
            return Err(RegistryError::TooManyRooms(self.rooms_config.max_rooms));
        }

        let slot = Arc::new(RoomSlot {
            driver: OnceCell::new(),
            last_used: AtomicU64::new(self.now_ms()),
        });
        slots.insert(name.to_string(), Arc::clone(&slot));
        Ok(slot)
    }

    /// Rooms that have finished starting
    pub async fn room_count(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.driver.initialized())
            .count()
    }

    pub async fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.driver.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop started rooms unused for `max_idle`, except the default room and
    /// those in `keep`; returns the names stopped
    pub async fn evict_idle(&self, max_idle: Duration, keep: &HashSet<String>) -> Vec<String> {
        let cutoff = self.now_ms().saturating_sub(max_idle.as_millis() as u64);
        let mut slots = self.slots.write().await;

        let idle: Vec<String> = slots
            .iter()
            .filter(|(name, slot)| {
                slot.driver.initialized()
                    && slot.last_used.load(Ordering::Relaxed) < cutoff
                    && name.as_str() != self.rooms_config.default_room
                    && !keep.contains(name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &idle {
            if let Some(driver) = slots.remove(name).as_ref().and_then(|slot| slot.driver.get()) {
                driver.stop();
            }
            tracing::info!(room = %name, "Stopped idle room");
        }
        idle
    }

    /// Stop every room
    pub async fn shutdown(&self) {
        let mut slots = self.slots.write().await;
        for (_, slot) in slots.drain() {
            if let Some(driver) = slot.driver.get() {
                driver.stop();
            }
        }
    }
}
