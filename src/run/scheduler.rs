//! Fixed-cadence trigger for catch-up runs.

use super::{RunController, RunReport};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Status information for the scheduler
#[derive(Clone, Debug, Default)]
pub struct SchedulerStatus {
    /// Last successful run
    pub last_run: Option<DateTime<Utc>>,
    /// Last error message (if any)
    pub last_error: Option<String>,
    pub last_report: Option<RunReport>,
    /// Total number of successful runs
    pub run_count: u64,
    /// Total number of failed runs
    pub error_count: u64,
}

pub struct Scheduler {
    controller: Arc<RunController>,
    interval: Duration,
    status: Arc<tokio::sync::Mutex<SchedulerStatus>>,
}

impl Scheduler {
    pub fn new(controller: Arc<RunController>, interval_seconds: u64) -> Self {
        Self {
            controller,
            interval: Duration::from_secs(interval_seconds),
            status: Arc::new(tokio::sync::Mutex::new(SchedulerStatus::default())),
        }
    }

    /// Returns a clone of the status tracker for external monitoring.
    pub fn status(&self) -> Arc<tokio::sync::Mutex<SchedulerStatus>> {
        Arc::clone(&self.status)
    }

    /// Trigger a single run against the current wall clock
    pub async fn run_once(&self) -> Result<RunReport> {
        let result = self.controller.execute(Utc::now()).await;

        let mut status = self.status.lock().await;
        match &result {
            Ok(report) => {
                status.last_run = Some(Utc::now());
                status.last_error = None;
                status.last_report = Some(report.clone());
                status.run_count += 1;
            }
            Err(e) => {
                status.last_error = Some(format!("{:#}", e));
                status.error_count += 1;
            }
        }

        result
    }

    /// Run on every tick until the task is cancelled.
    /// A failed run is logged and retried on the next tick.
    pub async fn run_loop(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting backfill scheduler"
        );

        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            if let Err(e) = self.run_once().await {
                error!(error = %format!("{:#}", e), "Catch-up run failed");
            }
        }
    }
}
