//! Pet View
//!
//! The room's cat: three meters, a sprite animation and coin-priced actions.
//! An action debits the ledger before touching the cat, so a refused debit
//! leaves the pet row exactly as it was.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use super::{update_channel, ViewError, ViewResult, ViewUpdate};
use crate::backend::{
    clamp_meter, BackendError, ChangeEvent, Meter, Pet, PetPatch, SharedBackend, METER_MAX,
};

/// Sprite currently playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Animation {
    Idle,
    Feed,
    Bath,
    Pet,
    Play,
}

impl Animation {
    pub fn key(&self) -> &'static str {
        match self {
            Animation::Idle => "idle",
            Animation::Feed => "feed",
            Animation::Bath => "bath",
            Animation::Pet => "pet",
            Animation::Play => "play",
        }
    }

    /// Asset path of the sprite
    pub fn sprite(&self) -> String {
        format!("/cat/{}.gif", self.key())
    }

    /// Unknown keys fall back to idle
    pub fn from_key(key: &str) -> Self {
        match key {
            "feed" => Animation::Feed,
            "bath" => Animation::Bath,
            "pet" => Animation::Pet,
            "play" => Animation::Play,
            _ => Animation::Idle,
        }
    }
}

/// Sound effect played with an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sound {
    Munch,
    Purr,
    Meow,
}

impl Sound {
    pub fn key(&self) -> &'static str {
        match self {
            Sound::Munch => "munch",
            Sound::Purr => "purr",
            Sound::Meow => "meow",
        }
    }

    pub fn path(&self) -> String {
        format!("/sounds/{}.mp3", self.key())
    }
}

/// Coin-priced things to do with the cat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PetAction {
    Feed,
    Pet,
    Play,
    Bathe,
}

/// What an action costs and does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub label: &'static str,
    pub meter: Meter,
    pub delta: i32,
    pub price: i64,
    pub animation: Animation,
    pub sound: Sound,
}

impl PetAction {
    pub const ALL: [PetAction; 4] = [
        PetAction::Feed,
        PetAction::Pet,
        PetAction::Play,
        PetAction::Bathe,
    ];

    pub fn spec(&self) -> ActionSpec {
        match self {
            PetAction::Feed => ActionSpec {
                label: "Feed",
                meter: Meter::Hunger,
                delta: 20,
                price: 5,
                animation: Animation::Feed,
                sound: Sound::Munch,
            },
            PetAction::Pet => ActionSpec {
                label: "Pet",
                meter: Meter::Happiness,
                delta: 10,
                price: 2,
                animation: Animation::Pet,
                sound: Sound::Purr,
            },
            PetAction::Play => ActionSpec {
                label: "Play",
                meter: Meter::Happiness,
                delta: 15,
                price: 3,
                animation: Animation::Play,
                sound: Sound::Meow,
            },
            PetAction::Bathe => ActionSpec {
                label: "Bathe",
                meter: Meter::Cleanliness,
                delta: 20,
                price: 4,
                animation: Animation::Bath,
                sound: Sound::Meow,
            },
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            PetAction::Feed => "feed",
            PetAction::Pet => "pet",
            PetAction::Play => "play",
            PetAction::Bathe => "bathe",
        }
    }
}

impl fmt::Display for PetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for PetAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feed" => Ok(PetAction::Feed),
            "pet" => Ok(PetAction::Pet),
            "play" => Ok(PetAction::Play),
            "bathe" | "bath" => Ok(PetAction::Bathe),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

/// Renderable state of the pet panel; meters are always within 0..=100
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PetSnapshot {
    pub room: String,
    pub age_days: i64,
    pub hunger: u8,
    pub happiness: u8,
    pub cleanliness: u8,
    pub coins: i64,
    pub animation: Animation,
    pub sprite: String,
    pub sound: Option<String>,
    /// Bumped on every action, so clients play each sound once
    pub action_seq: u64,
}

#[derive(Debug)]
struct PetState {
    pet: Pet,
    coins: i64,
    animation: Animation,
    sound: Option<Sound>,
    action_seq: u64,
    last_published: Option<PetSnapshot>,
}

/// The room's cat
pub struct PetView {
    backend: SharedBackend,
    room: String,
    animation_hold: Duration,
    state: RwLock<PetState>,
    updates: broadcast::Sender<ViewUpdate>,
}

/// Whole days since birth, never negative
pub fn age_days(born_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - born_at).num_days().max(0)
}

impl PetView {
    pub fn new(backend: SharedBackend, room: impl Into<String>, animation_hold: Duration) -> Self {
        Self::with_updates(backend, room, animation_hold, update_channel())
    }

    pub fn with_updates(
        backend: SharedBackend,
        room: impl Into<String>,
        animation_hold: Duration,
        updates: broadcast::Sender<ViewUpdate>,
    ) -> Self {
        let room = room.into();
        Self {
            backend,
            animation_hold,
            state: RwLock::new(PetState {
                pet: Pet::fresh(room.clone(), Utc::now()),
                coins: 0,
                animation: Animation::Idle,
                sound: None,
                action_seq: 0,
                last_published: None,
            }),
            room,
            updates,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> PetSnapshot {
        let state = self.state.read().await;
        self.build_snapshot(&state)
    }

    fn build_snapshot(&self, state: &PetState) -> PetSnapshot {
        PetSnapshot {
            room: self.room.clone(),
            age_days: age_days(state.pet.born_at, Utc::now()),
            hunger: clamp_meter(state.pet.hunger),
            happiness: clamp_meter(state.pet.happiness),
            cleanliness: clamp_meter(state.pet.cleanliness),
            coins: state.coins,
            animation: state.animation,
            sprite: state.animation.sprite(),
            sound: state.sound.map(|s| s.path()),
            action_seq: state.action_seq,
        }
    }

    fn publish_locked(&self, state: &mut PetState) {
        let snapshot = self.build_snapshot(state);
        if state.last_published.as_ref() == Some(&snapshot) {
            return;
        }
        state.last_published = Some(snapshot.clone());
        let _ = self.updates.send(ViewUpdate::Pet(snapshot));
    }

    /// Re-fetch the pet row; a missing row keeps the current state
    pub async fn refresh_pet(&self) -> ViewResult<()> {
        if let Some(pet) = self.backend.get_pet(&self.room).await? {
            let mut state = self.state.write().await;
            state.pet = pet;
            self.publish_locked(&mut state);
        }
        Ok(())
    }

    pub async fn refresh_coins(&self) -> ViewResult<()> {
        let coins = self.backend.coins_for_room(&self.room).await?;
        self.set_coins(coins).await;
        Ok(())
    }

    async fn set_coins(&self, coins: i64) {
        let mut state = self.state.write().await;
        state.coins = coins;
        self.publish_locked(&mut state);
    }

    /// Spend coins on an action and apply its meter delta
    ///
    /// The balance is checked and debited before the pet row is written;
    /// an insufficient balance returns [`ViewError::InsufficientCoins`] with
    /// no pet write at all.
    pub async fn act(self: &Arc<Self>, action: PetAction) -> ViewResult<PetSnapshot> {
        let spec = action.spec();

        let balance = self.backend.coins_for_room(&self.room).await?;
        self.set_coins(balance).await;
        if balance < spec.price {
            tracing::info!(room = %self.room, %action, balance, price = spec.price, "Not enough coins");
            return Err(ViewError::InsufficientCoins {
                balance,
                price: spec.price,
            });
        }

        match self.backend.spend_coins(&self.room, spec.price).await {
            Ok(()) => {}
            Err(BackendError::InsufficientCoins { price }) => {
                // Someone else spent in between the check and the debit
                let balance = self
                    .backend
                    .coins_for_room(&self.room)
                    .await
                    .unwrap_or(balance);
                self.set_coins(balance).await;
                return Err(ViewError::InsufficientCoins { balance, price });
            }
            Err(e) => return Err(e.into()),
        }

        let current = self.state.read().await.pet.meter(spec.meter);
        let target = (clamp_meter(current) as i32 + spec.delta).min(METER_MAX);
        let patch = PetPatch::new(Utc::now()).set(spec.meter, target);

        if let Err(e) = self.backend.update_pet(&self.room, &patch).await {
            tracing::error!(
                room = %self.room,
                %action,
                price = spec.price,
                error = %e,
                "Coins were spent but the pet update failed"
            );
            return Err(e.into());
        }

        let seq = {
            let mut state = self.state.write().await;
            state.pet.apply(&patch);
            state.animation = spec.animation;
            state.sound = Some(spec.sound);
            state.action_seq += 1;
            self.publish_locked(&mut state);
            state.action_seq
        };
        tracing::info!(room = %self.room, %action, price = spec.price, meter = ?spec.meter, value = target, "Pet action");

        self.schedule_idle(seq);

        if let Err(e) = self.refresh_coins().await {
            tracing::warn!(room = %self.room, error = %e, "Coin refresh after action failed");
        }

        Ok(self.snapshot().await)
    }

    /// Return to the idle sprite after the hold, unless another action
    /// started in the meantime
    fn schedule_idle(self: &Arc<Self>, seq: u64) {
        let view: Weak<Self> = Arc::downgrade(self);
        let hold = self.animation_hold;

        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            if let Some(view) = view.upgrade() {
                let mut state = view.state.write().await;
                if state.action_seq == seq {
                    state.animation = Animation::Idle;
                    state.sound = None;
                    view.publish_locked(&mut state);
                }
            }
        });
    }

    /// Lower every meter by one point, floored at zero
    pub async fn decay_tick(&self) -> ViewResult<()> {
        let patch = {
            let state = self.state.read().await;
            let decayed = |m: Meter| (clamp_meter(state.pet.meter(m)) as i32 - 1).max(0);
            PetPatch::new(Utc::now())
                .set(Meter::Hunger, decayed(Meter::Hunger))
                .set(Meter::Happiness, decayed(Meter::Happiness))
                .set(Meter::Cleanliness, decayed(Meter::Cleanliness))
        };

        self.backend.update_pet(&self.room, &patch).await?;

        let mut state = self.state.write().await;
        state.pet.apply(&patch);
        self.publish_locked(&mut state);
        tracing::debug!(room = %self.room, "Pet meters decayed");
        Ok(())
    }

    /// Apply a pushed pet row; returns whether the state changed
    pub async fn apply_change(&self, event: &ChangeEvent) -> bool {
        let ChangeEvent::PetUpdated(pet) = event else {
            return false;
        };
        if pet.room != self.room {
            return false;
        }

        let mut state = self.state.write().await;
        if state.pet == *pet {
            return false;
        }
        state.pet = pet.clone();
        self.publish_locked(&mut state);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend, NewTask, Side};
    use chrono::Duration as ChronoDuration;

    async fn earn(backend: &MemoryBackend, coins: i64) {
        backend
            .insert_task(&NewTask::new("default", Side::Left, "chore", coins).unwrap())
            .await
            .unwrap();
        let id = backend
            .all_tasks("default")
            .await
            .last()
            .unwrap()
            .id
            .clone();
        backend.set_task_done(&id, true).await.unwrap();
    }

    fn pet_view(backend: Arc<MemoryBackend>, hold: Duration) -> Arc<PetView> {
        Arc::new(PetView::new(backend, "default", hold))
    }

    #[test]
    fn test_action_table() {
        let feed = PetAction::Feed.spec();
        assert_eq!((feed.meter, feed.delta, feed.price), (Meter::Hunger, 20, 5));
        assert_eq!(PetAction::Pet.spec().price, 2);
        assert_eq!(PetAction::Play.spec().delta, 15);
        assert_eq!(PetAction::Bathe.spec().animation, Animation::Bath);
        assert_eq!("bath".parse::<PetAction>().unwrap(), PetAction::Bathe);
        assert!("dance".parse::<PetAction>().is_err());
    }

    #[test]
    fn test_animation_sprites() {
        assert_eq!(Animation::Feed.sprite(), "/cat/feed.gif");
        assert_eq!(Animation::from_key("unknown"), Animation::Idle);
        assert_eq!(Sound::Purr.path(), "/sounds/purr.mp3");
    }

    #[test]
    fn test_age_days() {
        let now = Utc::now();
        assert_eq!(age_days(now - ChronoDuration::hours(47), now), 1);
        assert_eq!(age_days(now - ChronoDuration::days(3), now), 3);
        assert_eq!(age_days(now + ChronoDuration::days(1), now), 0);
    }

    #[tokio::test]
    async fn test_act_without_coins_writes_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let before = backend.get_pet("default").await.unwrap();

        let view = pet_view(Arc::clone(&backend), Duration::from_secs(10));
        let err = view.act(PetAction::Feed).await.unwrap_err();
        assert!(matches!(
            err,
            ViewError::InsufficientCoins {
                balance: 0,
                price: 5
            }
        ));

        assert_eq!(backend.get_pet("default").await.unwrap(), before);
        assert_eq!(view.snapshot().await.animation, Animation::Idle);
    }

    #[tokio::test]
    async fn test_act_spends_and_caps_meter() {
        let backend = Arc::new(MemoryBackend::new());
        earn(&backend, 10).await;
        backend.get_pet("default").await.unwrap();
        backend
            .update_pet("default", &PetPatch::new(Utc::now()).set(Meter::Hunger, 90))
            .await
            .unwrap();

        let view = pet_view(Arc::clone(&backend), Duration::from_secs(10));
        view.refresh_pet().await.unwrap();

        let snap = view.act(PetAction::Feed).await.unwrap();
        assert_eq!(snap.hunger, 100);
        assert_eq!(snap.coins, 5);
        assert_eq!(snap.animation, Animation::Feed);
        assert_eq!(snap.sound.as_deref(), Some("/sounds/munch.mp3"));
        assert_eq!(backend.get_pet("default").await.unwrap().unwrap().hunger, 100);
        assert_eq!(backend.coins_for_room("default").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_animation_returns_to_idle() {
        let backend = Arc::new(MemoryBackend::new());
        earn(&backend, 4).await;

        let view = pet_view(Arc::clone(&backend), Duration::from_millis(50));
        view.refresh_pet().await.unwrap();
        view.act(PetAction::Pet).await.unwrap();
        assert_eq!(view.snapshot().await.animation, Animation::Pet);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let snap = view.snapshot().await;
        assert_eq!(snap.animation, Animation::Idle);
        assert!(snap.sound.is_none());
    }

    #[tokio::test]
    async fn test_decay_floors_at_zero() {
        let backend = Arc::new(MemoryBackend::new());
        backend.get_pet("default").await.unwrap();
        backend
            .update_pet(
                "default",
                &PetPatch::new(Utc::now())
                    .set(Meter::Hunger, 1)
                    .set(Meter::Happiness, 0)
                    .set(Meter::Cleanliness, 50),
            )
            .await
            .unwrap();

        let view = pet_view(Arc::clone(&backend), Duration::from_secs(10));
        view.refresh_pet().await.unwrap();

        view.decay_tick().await.unwrap();
        view.decay_tick().await.unwrap();

        let snap = view.snapshot().await;
        assert_eq!((snap.hunger, snap.happiness, snap.cleanliness), (0, 0, 48));
        let stored = backend.get_pet("default").await.unwrap().unwrap();
        assert_eq!(stored.hunger, 0);
    }

    #[tokio::test]
    async fn test_out_of_range_rows_render_clamped() {
        let backend = Arc::new(MemoryBackend::new());
        let view = pet_view(backend, Duration::from_secs(10));

        let mut pet = Pet::fresh("default", Utc::now());
        pet.hunger = 180;
        pet.happiness = -30;
        assert!(view.apply_change(&ChangeEvent::PetUpdated(pet)).await);

        let snap = view.snapshot().await;
        assert_eq!(snap.hunger, 100);
        assert_eq!(snap.happiness, 0);
    }

    #[tokio::test]
    async fn test_apply_change_ignores_other_rooms() {
        let backend = Arc::new(MemoryBackend::new());
        let view = pet_view(backend, Duration::from_secs(10));
        let pet = Pet::fresh("elsewhere", Utc::now());
        assert!(!view.apply_change(&ChangeEvent::PetUpdated(pet)).await);
    }
}
