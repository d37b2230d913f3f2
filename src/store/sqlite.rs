//! Relational reading store backed by SQLite.
//!
//! Readings are rows keyed by `(timestamp, equipment_tag)`, so re-delivering a
//! batch overwrites instead of duplicating. The checkpoint lives in its own
//! table and can be rebuilt from the readings when it is missing.

use super::{batch_label, CheckpointStore, ReadingSink};
use crate::equipment::EquipmentTag;
use crate::model::{format_timestamp, parse_timestamp, Checkpoint, EntityState, Reading, WriteBatch};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const LAST_RECORD_KEY: &str = "last_record_timestamp";
const ANOMALY_KEY: &str = "is_anomaly_enabled";

type Row = (String, String, Option<f64>);

/// SQLite-backed checkpoint store and reading sink.
///
/// # Schema
/// ```sql
/// CREATE TABLE sensor_reading (
///     timestamp TEXT NOT NULL,       -- YYYY-MM-DDTHH:MM:00Z
///     equipment_tag TEXT NOT NULL,
///     value REAL,
///     PRIMARY KEY (timestamp, equipment_tag)
/// );
/// CREATE TABLE checkpoint_state (
///     equipment_tag TEXT PRIMARY KEY,
///     last_timestamp TEXT NOT NULL,
///     last_value REAL
/// );
/// CREATE TABLE settings (
///     key TEXT PRIMARY KEY,
///     value TEXT NOT NULL
/// );
/// ```
///
/// Timestamps are fixed-width text, so lexical order is chronological order.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates or opens a store. `":memory:"` gives a throwaway database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_reading (
                timestamp TEXT NOT NULL,
                equipment_tag TEXT NOT NULL,
                value REAL,
                PRIMARY KEY (timestamp, equipment_tag)
            );
            CREATE INDEX IF NOT EXISTS idx_reading_tag_ts
                ON sensor_reading(equipment_tag, timestamp);
            CREATE TABLE IF NOT EXISTS checkpoint_state (
                equipment_tag TEXT PRIMARY KEY,
                last_timestamp TEXT NOT NULL,
                last_value REAL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection mutex poisoned"))
    }

    /// Upserts every reading of the batch in one transaction
    pub fn insert_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO sensor_reading (timestamp, equipment_tag, value)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(timestamp, equipment_tag) DO UPDATE SET
                        value = excluded.value
                    "#,
                )
                .context("Failed to prepare insert")?;

            for reading in &batch.readings {
                stmt.execute(params![
                    format_timestamp(&reading.timestamp),
                    reading.equipment_tag.as_str(),
                    reading.value,
                ])
                .with_context(|| format!("Failed to insert reading for {}", reading.equipment_tag))?;
            }
        }
        tx.commit().context("Failed to commit batch")?;

        debug!(batch = %batch_label(batch), readings = batch.len(), "Batch inserted");
        Ok(())
    }

    /// All readings stored for one timestamp, ordered by tag
    pub fn query_readings(&self, timestamp: &DateTime<Utc>) -> Result<Vec<Reading>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT timestamp, equipment_tag, value
                FROM sensor_reading
                WHERE timestamp = ?1
                ORDER BY equipment_tag
                "#,
            )
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![format_timestamp(timestamp)], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<Row>, _>>()
            .context("Failed to read results")?;

        rows.into_iter()
            .map(|(ts, tag, value)| {
                Ok(Reading {
                    timestamp: parse_timestamp(&ts)?,
                    equipment_tag: EquipmentTag::new(tag),
                    value,
                })
            })
            .collect()
    }

    /// Deletes all readings for one timestamp, returning how many were removed
    pub fn delete_readings(&self, timestamp: &DateTime<Utc>) -> Result<usize> {
        let removed = self
            .lock()?
            .execute(
                "DELETE FROM sensor_reading WHERE timestamp = ?1",
                params![format_timestamp(timestamp)],
            )
            .context("Failed to delete readings")?;

        Ok(removed)
    }

    /// Replaces the stored checkpoint atomically
    pub fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        tx.execute("DELETE FROM checkpoint_state", [])
            .context("Failed to clear checkpoint")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO checkpoint_state (equipment_tag, last_timestamp, last_value) \
                     VALUES (?1, ?2, ?3)",
                )
                .context("Failed to prepare checkpoint insert")?;

            for state in &checkpoint.entity_states {
                stmt.execute(params![
                    state.equipment_tag.as_str(),
                    format_timestamp(&state.last_timestamp),
                    state.last_value,
                ])
                .context("Failed to store entity state")?;
            }
        }
        upsert_setting(&tx, LAST_RECORD_KEY, &format_timestamp(&checkpoint.last_timestamp))?;

        tx.commit().context("Failed to commit checkpoint")?;
        Ok(())
    }

    /// Stored checkpoint, or one rebuilt from the latest reading per tag.
    /// `Ok(None)` when neither exists.
    pub fn read_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;

        let rows = select_rows(
            &conn,
            r#"
            SELECT equipment_tag, last_timestamp, last_value
            FROM checkpoint_state
            ORDER BY equipment_tag
            "#,
        )?;
        let stored_last = get_setting(&conn, LAST_RECORD_KEY)?;

        if !rows.is_empty() {
            let states = into_states(rows)?;
            let checkpoint = match stored_last {
                Some(ts) => Checkpoint::new(parse_timestamp(&ts)?, states),
                None => from_states(states)?,
            };
            return Ok(Some(checkpoint));
        }

        let latest = select_rows(
            &conn,
            r#"
            SELECT r.equipment_tag, r.timestamp, r.value
            FROM sensor_reading r
            JOIN (
                SELECT equipment_tag, MAX(timestamp) AS latest
                FROM sensor_reading
                GROUP BY equipment_tag
            ) m ON r.equipment_tag = m.equipment_tag AND r.timestamp = m.latest
            ORDER BY r.equipment_tag
            "#,
        )?;

        if latest.is_empty() {
            return Ok(None);
        }

        let checkpoint = from_states(into_states(latest)?)?;
        info!(
            entities = checkpoint.entity_count(),
            last_timestamp = %format_timestamp(&checkpoint.last_timestamp),
            "Checkpoint recovered from stored readings"
        );
        Ok(Some(checkpoint))
    }

    pub fn read_anomaly(&self) -> Result<Option<bool>> {
        let conn = self.lock()?;
        get_setting(&conn, ANOMALY_KEY)?
            .map(|value| {
                value
                    .parse::<bool>()
                    .with_context(|| format!("Invalid anomaly setting '{}'", value))
            })
            .transpose()
    }

    pub fn write_anomaly(&self, enabled: bool) -> Result<()> {
        let conn = self.lock()?;
        upsert_setting(&conn, ANOMALY_KEY, &enabled.to_string())
    }
}

fn select_rows(conn: &Connection, sql: &str) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql).context("Failed to prepare query")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .context("Failed to execute query")?
        .collect::<Result<Vec<Row>, _>>()
        .context("Failed to read results")?;
    Ok(rows)
}

fn into_states(rows: Vec<Row>) -> Result<Vec<EntityState>> {
    rows.into_iter()
        .map(|(tag, ts, value)| {
            Ok(EntityState::new(
                EquipmentTag::new(tag),
                parse_timestamp(&ts)?,
                value,
            ))
        })
        .collect()
}

fn from_states(states: Vec<EntityState>) -> Result<Checkpoint> {
    let fallback = states
        .first()
        .map(|state| state.last_timestamp)
        .context("Cannot build a checkpoint without entity states")?;
    Ok(Checkpoint::from_states(states, fallback))
}

fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("Failed to read setting {}", key))
}

fn upsert_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO settings (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )
    .with_context(|| format!("Failed to store setting {}", key))?;
    Ok(())
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        self.read_checkpoint()
    }

    async fn load_anomaly_policy(&self) -> Result<Option<bool>> {
        self.read_anomaly()
    }

    async fn save_anomaly_policy(&self, enabled: bool) -> Result<()> {
        self.write_anomaly(enabled)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.write_checkpoint(checkpoint)
    }
}

#[async_trait]
impl ReadingSink for SqliteStore {
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        self.insert_batch(batch)
    }
}
