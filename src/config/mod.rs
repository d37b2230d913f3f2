pub mod runtime;
pub use runtime::RuntimeOverrides;

use crate::equipment::ProfileTable;
use crate::model::timestamp;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

// Re-export existing config types
pub use crate::store::StorageConfig;

/// Complete backfill configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub equipment: ProfileTable,
}

/// Generation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Tick length (seconds); a positive multiple of 60, at most one day
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: i64,
    /// First timestamp generated when no checkpoint exists yet
    #[serde(default = "default_epoch_start", with = "timestamp")]
    pub epoch_start: DateTime<Utc>,
    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Largest accepted tick length (one day)
pub const MAX_INTERVAL_SECONDS: i64 = 86_400;

fn default_interval_seconds() -> i64 {
    60
}

fn default_epoch_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 10, 13, 2, 2, 0)
        .single()
        .unwrap_or_default()
}

impl GenerationConfig {
    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_seconds)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            epoch_start: default_epoch_start(),
            seed: None,
        }
    }
}

/// Trigger cadence
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_interval")]
    pub interval_seconds: u64,
    /// Run a single catch-up and exit
    #[serde(default)]
    pub run_once: bool,
}

fn default_schedule_interval() -> u64 {
    60
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_schedule_interval(),
            run_once: false,
        }
    }
}

/// Batch delivery
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Concurrent batch writers; 1 writes sequentially
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    1
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            schedule: ScheduleConfig::default(),
            sink: SinkConfig::default(),
            storage: StorageConfig::default(),
            equipment: ProfileTable::default(),
        }
    }
}

/// Rejected configuration values
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    EmptyProfiles,
    InvalidProfile { tag: String, min: f64, max: f64 },
    InvalidInterval(i64),
    InvalidScheduleInterval(u64),
    InvalidWorkers(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyProfiles => write!(f, "at least one equipment profile is required"),
            ConfigError::InvalidProfile { tag, min, max } => {
                write!(f, "equipment '{}' has invalid range [{}, {}]", tag, min, max)
            }
            ConfigError::InvalidInterval(secs) => {
                write!(
                    f,
                    "generation interval must be a positive multiple of 60 up to {}, got {}",
                    MAX_INTERVAL_SECONDS, secs
                )
            }
            ConfigError::InvalidScheduleInterval(secs) => {
                write!(f, "schedule interval must be positive, got {}", secs)
            }
            ConfigError::InvalidWorkers(n) => write!(f, "sink workers must be at least 1, got {}", n),
        }
    }
}

impl std::error::Error for ConfigError {}

impl BackfillConfig {
    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.equipment.is_empty() {
            return Err(ConfigError::EmptyProfiles);
        }
        if let Some((tag, profile)) = self.equipment.iter().find(|(_, p)| !p.is_valid()) {
            return Err(ConfigError::InvalidProfile {
                tag: tag.to_string(),
                min: profile.min,
                max: profile.max,
            });
        }
        // Persisted timestamps carry minute resolution only
        let interval = self.generation.interval_seconds;
        if interval <= 0 || interval % 60 != 0 || interval > MAX_INTERVAL_SECONDS {
            return Err(ConfigError::InvalidInterval(interval));
        }
        if self.schedule.interval_seconds == 0 {
            return Err(ConfigError::InvalidScheduleInterval(0));
        }
        if self.sink.workers == 0 {
            return Err(ConfigError::InvalidWorkers(0));
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl Into<PathBuf>) -> Result<BackfillConfig> {
    let path = path.into();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: BackfillConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
