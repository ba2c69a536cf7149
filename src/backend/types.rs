//! Record Types
//!
//! Rows exchanged with the hosted backend: checklist tasks, the room's cat,
//! partial pet updates and the change events delivered by the push feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound for every pet meter
pub const METER_MAX: i32 = 100;

/// Which partner's checklist a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(format!("Unknown side: {}", other)),
        }
    }
}

/// Opaque task identifier
///
/// The hosted table may use integer or uuid keys, so both JSON numbers and
/// strings are accepted and kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => TaskId(n.to_string()),
            RawId::Text(s) => TaskId(s),
        })
    }
}

/// A checklist task row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub room: String,
    pub side: Side,
    pub title: String,
    pub reward: i64,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTask {
    pub room: String,
    pub side: Side,
    pub title: String,
    pub reward: i64,
}

impl NewTask {
    /// Validate and normalize a task draft
    ///
    /// The title is trimmed and must not be empty; the reward must be at
    /// least one coin.
    pub fn new(
        room: impl Into<String>,
        side: Side,
        title: &str,
        reward: i64,
    ) -> Result<Self, String> {
        let title = title.trim();
        if title.is_empty() {
            return Err("Task title must not be empty".to_string());
        }
        if reward <= 0 {
            return Err(format!("Task reward must be positive, got {}", reward));
        }

        Ok(Self {
            room: room.into(),
            side,
            title: title.to_string(),
            reward,
        })
    }
}

/// One of the cat's meters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Meter {
    Hunger,
    Happiness,
    Cleanliness,
}

impl Meter {
    pub fn label(&self) -> &'static str {
        match self {
            Meter::Hunger => "Hunger",
            Meter::Happiness => "Happiness",
            Meter::Cleanliness => "Cleanliness",
        }
    }
}

/// Clamp a stored meter value into the displayable 0..=100 range
pub fn clamp_meter(value: i32) -> u8 {
    value.clamp(0, METER_MAX) as u8
}

/// The room's cat row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub room: String,
    pub hunger: i32,
    pub happiness: i32,
    pub cleanliness: i32,
    pub born_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Pet {
    /// State shown before the first fetch completes
    pub fn fresh(room: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            room: room.into(),
            hunger: METER_MAX,
            happiness: METER_MAX,
            cleanliness: METER_MAX,
            born_at: now,
            updated_at: None,
        }
    }

    pub fn meter(&self, meter: Meter) -> i32 {
        match meter {
            Meter::Hunger => self.hunger,
            Meter::Happiness => self.happiness,
            Meter::Cleanliness => self.cleanliness,
        }
    }

    /// Apply the fields present in a patch
    pub fn apply(&mut self, patch: &PetPatch) {
        if let Some(v) = patch.hunger {
            self.hunger = v;
        }
        if let Some(v) = patch.happiness {
            self.happiness = v;
        }
        if let Some(v) = patch.cleanliness {
            self.cleanliness = v;
        }
        self.updated_at = Some(patch.updated_at);
    }
}

/// Partial pet update; absent meters are left untouched remotely
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hunger: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub happiness: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanliness: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl PetPatch {
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            hunger: None,
            happiness: None,
            cleanliness: None,
            updated_at,
        }
    }

    pub fn set(mut self, meter: Meter, value: i32) -> Self {
        match meter {
            Meter::Hunger => self.hunger = Some(value),
            Meter::Happiness => self.happiness = Some(value),
            Meter::Cleanliness => self.cleanliness = Some(value),
        }
        self
    }
}

/// A row-level change pushed by the backend
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    TaskInserted(Task),
    TaskUpdated(Task),
    /// Hard delete or archival. The room is unknown for hard deletes
    /// delivered without the old row.
    TaskDeleted { room: Option<String>, id: TaskId },
    PetUpdated(Pet),
}

impl ChangeEvent {
    pub fn room(&self) -> Option<&str> {
        match self {
            ChangeEvent::TaskInserted(t) | ChangeEvent::TaskUpdated(t) => Some(&t.room),
            ChangeEvent::TaskDeleted { room, .. } => room.as_deref(),
            ChangeEvent::PetUpdated(p) => Some(&p.room),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parse() {
        assert_eq!("left".parse::<Side>().unwrap(), Side::Left);
        assert_eq!("RIGHT".parse::<Side>().unwrap(), Side::Right);
        assert!("middle".parse::<Side>().is_err());
    }

    #[test]
    fn test_task_id_accepts_numbers_and_strings() {
        let json = r#"{"id": 42, "room": "default", "side": "left", "title": "Dishes",
            "reward": 3, "done": false, "archived": false,
            "created_at": "2024-05-01T12:00:00.123456+00:00"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, TaskId::from(42));
        assert_eq!(task.side, Side::Left);

        let id: TaskId =
            serde_json::from_str(r#""7c9e6679-7425-40de-944b-e07fc1f90ae7""#).unwrap();
        assert_eq!(id.as_str(), "7c9e6679-7425-40de-944b-e07fc1f90ae7");
    }

    #[test]
    fn test_new_task_validation() {
        let task = NewTask::new("default", Side::Right, "  Laundry  ", 4).unwrap();
        assert_eq!(task.title, "Laundry");

        assert!(NewTask::new("default", Side::Right, "   ", 4).is_err());
        assert!(NewTask::new("default", Side::Right, "Laundry", 0).is_err());
        assert!(NewTask::new("default", Side::Right, "Laundry", -2).is_err());
    }

    #[test]
    fn test_clamp_meter() {
        assert_eq!(clamp_meter(-5), 0);
        assert_eq!(clamp_meter(55), 55);
        assert_eq!(clamp_meter(140), 100);
    }

    #[test]
    fn test_pet_patch_serializes_only_present_fields() {
        let now = Utc::now();
        let patch = PetPatch::new(now).set(Meter::Hunger, 80);
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["hunger"], 80);
        assert!(json.get("happiness").is_none());
        assert!(json.get("updated_at").is_some());

        let mut pet = Pet::fresh("default", now);
        pet.apply(&patch);
        assert_eq!(pet.hunger, 80);
        assert_eq!(pet.happiness, 100);
    }
}
