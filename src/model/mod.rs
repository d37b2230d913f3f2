use crate::equipment::{EquipmentTag, ProfileTable};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub mod timestamp;


pub use timestamp::{format_timestamp, parse_timestamp, TIMESTAMP_FORMAT};

/// One observation of one equipment tag
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,

    pub equipment_tag: EquipmentTag,

    /// `None` only for states synthesized before any reading existed
    #[serde(default)]
    pub value: Option<f64>,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, equipment_tag: EquipmentTag, value: f64) -> Self {
        Self {
            timestamp,
            equipment_tag,
            value: Some(value),
        }
    }
}

/// Most recent reading known for a tag
#[derive(Clone, Debug, PartialEq)]
pub struct EntityState {
    pub equipment_tag: EquipmentTag,
    pub last_timestamp: DateTime<Utc>,
    pub last_value: Option<f64>,
}

impl EntityState {
    pub fn new(
        equipment_tag: EquipmentTag,
        last_timestamp: DateTime<Utc>,
        last_value: Option<f64>,
    ) -> Self {
        Self {
            equipment_tag,
            last_timestamp,
            last_value,
        }
    }

    pub fn to_reading(&self) -> Reading {
        Reading {
            timestamp: self.last_timestamp,
            equipment_tag: self.equipment_tag.clone(),
            value: self.last_value,
        }
    }
}

impl From<Reading> for EntityState {
    fn from(reading: Reading) -> Self {
        Self {
            equipment_tag: reading.equipment_tag,
            last_timestamp: reading.timestamp,
            last_value: reading.value,
        }
    }
}

/// Durable resume point for the whole job.
///
/// Serialized as `{"last_record_timestamp": ..., "records": [...]}` where each
/// record is the entity's last reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "CheckpointDocument", from = "CheckpointDocument")]
pub struct Checkpoint {
    pub last_timestamp: DateTime<Utc>,
    pub entity_states: Vec<EntityState>,
}

impl Checkpoint {
    pub fn new(last_timestamp: DateTime<Utc>, entity_states: Vec<EntityState>) -> Self {
        Self {
            last_timestamp,
            entity_states,
        }
    }

    /// Checkpoint used when nothing has been persisted yet: every configured
    /// tag sits one interval before `epoch_start` with no value.
    pub fn initial(profiles: &ProfileTable, epoch_start: DateTime<Utc>, interval: Duration) -> Self {
        let last_timestamp = epoch_start - interval;
        let entity_states = profiles
            .tags()
            .map(|tag| EntityState::new(tag.clone(), last_timestamp, None))
            .collect();

        Self {
            last_timestamp,
            entity_states,
        }
    }

    /// Build from per-entity states, deriving `last_timestamp` as their maximum.
    /// Falls back to `fallback` when there are no states.
    pub fn from_states(entity_states: Vec<EntityState>, fallback: DateTime<Utc>) -> Self {
        let last_timestamp = entity_states
            .iter()
            .map(|state| state.last_timestamp)
            .max()
            .unwrap_or(fallback);

        Self {
            last_timestamp,
            entity_states,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entity_states.len()
    }

    pub fn state(&self, tag: &str) -> Option<&EntityState> {
        self.entity_states
            .iter()
            .find(|state| state.equipment_tag.as_str() == tag)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    #[serde(with = "timestamp")]
    last_record_timestamp: DateTime<Utc>,
    records: Vec<Reading>,
}

impl From<Checkpoint> for CheckpointDocument {
    fn from(checkpoint: Checkpoint) -> Self {
        Self {
            last_record_timestamp: checkpoint.last_timestamp,
            records: checkpoint
                .entity_states
                .iter()
                .map(EntityState::to_reading)
                .collect(),
        }
    }
}

impl From<CheckpointDocument> for Checkpoint {
    fn from(document: CheckpointDocument) -> Self {
        Self {
            last_timestamp: document.last_record_timestamp,
            entity_states: document.records.into_iter().map(EntityState::from).collect(),
        }
    }
}

/// One tick's worth of newly generated readings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub readings: Vec<Reading>,
}

impl WriteBatch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            readings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
