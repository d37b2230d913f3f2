// Configuration loading and environment overrides
pub mod config;

// Equipment tags and value ranges
pub mod equipment;

// Readings, checkpoints and their serialized forms
pub mod model;

// Catch-up generation (pure computation)
pub mod engine;

// Checkpoint store and reading sink adapters
pub mod store;

// Run controller and scheduler
pub mod run;

pub use config::{load_config, BackfillConfig};
pub use run::{RunController, RunReport, Scheduler};
