//! Storage capabilities used by a run, and the adapters implementing them.
//!
//! A run needs exactly two things from storage: somewhere to read and write
//! the checkpoint (plus the anomaly toggle), and somewhere to deliver batches.
//! Every backend implements both traits on one type.

use crate::model::{format_timestamp, Checkpoint, WriteBatch};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod files;
mod sqlite;

pub use files::{FileStore, ANOMALY_FILE, CHECKPOINT_FILE};
pub use sqlite::SqliteStore;

/// Durable resume point and anomaly toggle
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet
    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>>;

    /// `Ok(None)` when the toggle has never been written
    async fn load_anomaly_policy(&self) -> Result<Option<bool>>;

    async fn save_anomaly_policy(&self, enabled: bool) -> Result<()>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Destination for generated readings.
///
/// Writes must be idempotent and keyed by the batch timestamp: batches may be
/// delivered concurrently and in any order, and a failed run is retried from
/// the previous checkpoint.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()>;
}

/// Directory layout for batch documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathLayout {
    /// `YYYY/MM/DD/HH/YYYY-MM-DD-HH-MM.json` (data-lake layout)
    #[default]
    Hourly,
    /// `YYYY/MM/DD/YYYY-MM-DD-HH-MM.json` (blob layout)
    Daily,
}

impl PathLayout {
    /// Path of the batch document for `timestamp`, relative to the store root
    pub fn batch_path(&self, timestamp: &DateTime<Utc>, compress: bool) -> PathBuf {
        let directory = match self {
            PathLayout::Hourly => timestamp.format("%Y/%m/%d/%H").to_string(),
            PathLayout::Daily => timestamp.format("%Y/%m/%d").to_string(),
        };
        let extension = if compress { "json.gz" } else { "json" };
        let filename = format!("{}.{}", timestamp.format("%Y-%m-%d-%H-%M"), extension);
        PathBuf::from(directory).join(filename)
    }
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Relational rows, one per `(timestamp, equipment_tag)`
    Sqlite {
        #[serde(default = "default_db_path")]
        path: PathBuf,
    },
    /// JSON documents under a root directory
    Files {
        #[serde(default = "default_root")]
        root: PathBuf,
        #[serde(default)]
        layout: PathLayout,
        #[serde(default)]
        compress: bool,
    },
}

fn default_db_path() -> PathBuf {
    PathBuf::from("telemetry.db")
}

fn default_root() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Files {
            root: default_root(),
            layout: PathLayout::default(),
            compress: false,
        }
    }
}

/// Both capabilities, backed by the same adapter
#[derive(Clone)]
pub struct Storage {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub sink: Arc<dyn ReadingSink>,
}

impl Storage {
    pub fn from_adapter<T>(adapter: Arc<T>) -> Self
    where
        T: CheckpointStore + ReadingSink + 'static,
    {
        Self {
            checkpoints: adapter.clone(),
            sink: adapter,
        }
    }
}

/// Open the configured backend
pub fn open_storage(config: &StorageConfig) -> Result<Storage> {
    match config {
        StorageConfig::Sqlite { path } => {
            let store = SqliteStore::new(path)
                .with_context(|| format!("Failed to open SQLite store {}", path.display()))?;
            info!(path = %path.display(), "Opened SQLite store");
            Ok(Storage::from_adapter(Arc::new(store)))
        }
        StorageConfig::Files {
            root,
            layout,
            compress,
        } => {
            let store = FileStore::new(root, *layout, *compress)
                .with_context(|| format!("Failed to open file store {}", root.display()))?;
            info!(
                root = %root.display(),
                layout = ?layout,
                compress = compress,
                "Opened file store"
            );
            Ok(Storage::from_adapter(Arc::new(store)))
        }
    }
}

/// Label used in storage log lines
pub(crate) fn batch_label(batch: &WriteBatch) -> String {
    format_timestamp(&batch.timestamp)
}
