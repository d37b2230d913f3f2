//! Catch-up generation engine.
//!
//! Pure computation: given a checkpoint and a target time, produce every
//! missing reading grouped into per-timestamp batches plus the advanced
//! checkpoint. Nothing here touches storage.

use crate::equipment::{EquipmentProfile, EquipmentTag, ProfileTable};
use crate::model::{Checkpoint, EntityState, Reading, WriteBatch};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::debug;

pub mod gap;
pub mod value;


pub use gap::{is_due, GapEnumerator};
pub use value::{generate_value, round2, RngSampler, Sampler};

/// Errors raised while generating readings
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Checkpoint references a tag with no configured profile
    UnknownEquipment(EquipmentTag),
    /// Checkpoint lists the same tag more than once
    DuplicateEquipment(EquipmentTag),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnknownEquipment(tag) => {
                write!(f, "no equipment profile configured for tag '{}'", tag)
            }
            EngineError::DuplicateEquipment(tag) => {
                write!(f, "checkpoint lists tag '{}' more than once", tag)
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// Output of one catch-up pass
#[derive(Debug, Clone, PartialEq)]
pub struct CatchUp {
    /// Ascending by timestamp
    pub batches: Vec<WriteBatch>,
    pub checkpoint: Checkpoint,
}

impl CatchUp {
    pub fn reading_count(&self) -> usize {
        self.batches.iter().map(WriteBatch::len).sum()
    }
}

/// Per-entity cursor used during a pass
struct Cursor<'a> {
    profile: &'a EquipmentProfile,
    state: EntityState,
    ticks: GapEnumerator,
    active: bool,
}

pub struct CatchUpEngine<'a> {
    profiles: &'a ProfileTable,
    interval: Duration,
}

impl<'a> CatchUpEngine<'a> {
    pub fn new(profiles: &'a ProfileTable, interval: Duration) -> Self {
        Self { profiles, interval }
    }

    /// Generate every reading due between `checkpoint` and `now`.
    ///
    /// All entities advance in lockstep, one tick per iteration, each from its
    /// own last timestamp. Readings sharing a timestamp land in the same batch,
    /// in the order they were generated. Unknown or repeated tags fail before
    /// any value is drawn.
    pub fn run(
        &self,
        checkpoint: &Checkpoint,
        now: DateTime<Utc>,
        anomaly_enabled: bool,
        sampler: &mut dyn Sampler,
    ) -> Result<CatchUp, EngineError> {
        let mut seen = HashSet::with_capacity(checkpoint.entity_count());
        let mut cursors = checkpoint
            .entity_states
            .iter()
            .map(|state| {
                if !seen.insert(state.equipment_tag.as_str()) {
                    return Err(EngineError::DuplicateEquipment(state.equipment_tag.clone()));
                }
                let profile = self
                    .profiles
                    .get(state.equipment_tag.as_str())
                    .ok_or_else(|| EngineError::UnknownEquipment(state.equipment_tag.clone()))?;
                Ok(Cursor {
                    profile,
                    state: state.clone(),
                    ticks: GapEnumerator::new(state.last_timestamp, now, self.interval),
                    active: true,
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let mut pending: BTreeMap<DateTime<Utc>, WriteBatch> = BTreeMap::new();
        let mut tick_count = 0usize;

        loop {
            let mut advanced = false;

            for cursor in cursors.iter_mut().filter(|c| c.active) {
                let Some(timestamp) = cursor.ticks.next() else {
                    cursor.active = false;
                    continue;
                };

                let value = generate_value(cursor.profile, anomaly_enabled, sampler);
                let reading = Reading::new(timestamp, cursor.state.equipment_tag.clone(), value);

                pending
                    .entry(timestamp)
                    .or_insert_with(|| WriteBatch::new(timestamp))
                    .readings
                    .push(reading.clone());
                cursor.state = EntityState::from(reading);
                advanced = true;
            }

            if !advanced {
                break;
            }
            tick_count += 1;
        }

        let batches: Vec<WriteBatch> = pending.into_values().collect();
        let states = cursors.into_iter().map(|c| c.state).collect();
        let checkpoint = Checkpoint::from_states(states, checkpoint.last_timestamp);

        debug!(
            ticks = tick_count,
            batches = batches.len(),
            checkpoint = %checkpoint.last_timestamp,
            "Catch-up pass complete"
        );

        Ok(CatchUp {
            batches,
            checkpoint,
        })
    }
}
