//! JSON document store on the local filesystem.
//!
//! Layout under the root directory:
//! - `last-records.json` holds the checkpoint
//! - `anomaly.json` holds `{"is_anomaly_enabled": bool}`
//! - one document per batch, placed by [`PathLayout`]

use super::{batch_label, CheckpointStore, PathLayout, ReadingSink};
use crate::model::{Checkpoint, Reading, WriteBatch};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CHECKPOINT_FILE: &str = "last-records.json";
pub const ANOMALY_FILE: &str = "anomaly.json";

#[derive(Debug, Serialize, Deserialize)]
struct AnomalyRecord {
    is_anomaly_enabled: bool,
}

/// Filesystem-backed checkpoint store and reading sink
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    layout: PathLayout,
    compress: bool,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>, layout: PathLayout, compress: bool) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create store directory {}", root.display()))?;

        Ok(Self {
            root,
            layout,
            compress,
        })
    }

    /// Absolute path of the batch document for `timestamp`
    pub fn batch_path(&self, timestamp: &DateTime<Utc>) -> PathBuf {
        self.root
            .join(self.layout.batch_path(timestamp, self.compress))
    }

    /// Read back the batch written for `timestamp`, if any
    pub fn read_batch(&self, timestamp: &DateTime<Utc>) -> Result<Option<Vec<Reading>>> {
        let path = self.batch_path(timestamp);
        match read_document(&path)? {
            Some(json) => {
                let readings = serde_json::from_str(&json).with_context(|| {
                    format!("Failed to deserialize batch {}", path.display())
                })?;
                Ok(Some(readings))
            }
            None => Ok(None),
        }
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let json = serde_json::to_string_pretty(checkpoint)
            .context("Failed to serialize checkpoint to JSON")?;
        write_atomic(&self.root.join(CHECKPOINT_FILE), json.as_bytes(), false)
    }

    fn read_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let path = self.root.join(CHECKPOINT_FILE);
        match read_document(&path)? {
            Some(json) => {
                let checkpoint = serde_json::from_str(&json).with_context(|| {
                    format!("Failed to deserialize checkpoint {}", path.display())
                })?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    fn write_anomaly(&self, enabled: bool) -> Result<()> {
        let json = serde_json::to_string(&AnomalyRecord {
            is_anomaly_enabled: enabled,
        })
        .context("Failed to serialize anomaly record")?;
        write_atomic(&self.root.join(ANOMALY_FILE), json.as_bytes(), false)
    }

    fn read_anomaly(&self) -> Result<Option<bool>> {
        let path = self.root.join(ANOMALY_FILE);
        match read_document(&path)? {
            Some(json) => {
                let record: AnomalyRecord = serde_json::from_str(&json).with_context(|| {
                    format!("Failed to deserialize anomaly record {}", path.display())
                })?;
                Ok(Some(record.is_anomaly_enabled))
            }
            None => Ok(None),
        }
    }

    fn write_batch_document(&self, batch: &WriteBatch) -> Result<()> {
        let json = serde_json::to_string(&batch.readings)
            .context("Failed to serialize batch to JSON")?;
        let path = self.batch_path(&batch.timestamp);
        write_atomic(&path, json.as_bytes(), self.compress)?;

        debug!(
            batch = %batch_label(batch),
            path = %path.display(),
            readings = batch.len(),
            "Batch written"
        );
        Ok(())
    }
}

/// Write `bytes` to `path` through a `.tmp` sibling: write, fsync, rename.
/// Readers never observe a partial document.
fn write_atomic(path: &Path, bytes: &[u8], compress: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("tmp");

    {
        let tmp_file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temporary file {}", tmp_path.display()))?;

        let file = if compress {
            let mut encoder = GzEncoder::new(tmp_file, Compression::default());
            encoder
                .write_all(bytes)
                .context("Failed to write compressed data")?;
            encoder.finish().context("Failed to finish compression")?
        } else {
            let mut file = tmp_file;
            file.write_all(bytes).context("Failed to write data")?;
            file
        };

        file.sync_all().context("Failed to sync file to disk")?;
    }

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temporary file to {}", path.display()))?;

    Ok(())
}

/// Read a document, decompressing `.gz` files. `Ok(None)` if it does not exist.
fn read_document(path: &Path) -> Result<Option<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open {}", path.display()));
        }
    };

    let is_compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let mut json = String::new();
    if is_compressed {
        GzDecoder::new(file)
            .read_to_string(&mut json)
            .with_context(|| format!("Failed to decompress {}", path.display()))?;
    } else {
        let mut file = file;
        file.read_to_string(&mut json)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }

    Ok(Some(json))
}

#[async_trait]
impl CheckpointStore for FileStore {
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
impl ReadingSink for FileStore {
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        self.write_batch_document(batch)
    }
}
