use super::BackfillConfig;
use std::str::FromStr;

/// Environment overrides applied on top of the TOML file.
/// Unset or unparsable variables leave the file value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeOverrides {
    pub sink_workers: Option<usize>,
    pub run_once: Option<bool>,
    pub seed: Option<u64>,
    pub schedule_interval_seconds: Option<u64>,
}

impl RuntimeOverrides {
    /// Build from env vars
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            sink_workers: parse_var(&lookup, "BACKFILL_SINK_WORKERS"),
            run_once: parse_var(&lookup, "BACKFILL_RUN_ONCE"),
            seed: parse_var(&lookup, "BACKFILL_SEED"),
            schedule_interval_seconds: parse_var(&lookup, "BACKFILL_SCHEDULE_INTERVAL_SECONDS"),
        }
    }

    pub fn apply(&self, config: &mut BackfillConfig) {
        if let Some(workers) = self.sink_workers {
            config.sink.workers = workers;
        }
        if let Some(run_once) = self.run_once {
            config.schedule.run_once = run_once;
        }
        if let Some(seed) = self.seed {
            config.generation.seed = Some(seed);
        }
        if let Some(secs) = self.schedule_interval_seconds {
            config.schedule.interval_seconds = secs;
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
