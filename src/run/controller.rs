use crate::config::BackfillConfig;
use crate::engine::{CatchUpEngine, RngSampler};
use crate::equipment::ProfileTable;
use crate::model::{format_timestamp, Checkpoint, WriteBatch};
use crate::store::{CheckpointStore, ReadingSink, Storage};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Outcome of one successful run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub anomaly_enabled: bool,
    pub batches_written: usize,
    pub readings_written: usize,
    pub checkpoint_timestamp: DateTime<Utc>,
}

/// Drives one catch-up: load state, generate, flush, then save the checkpoint.
pub struct RunController {
    profiles: ProfileTable,
    interval: Duration,
    epoch_start: DateTime<Utc>,
    workers: usize,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ReadingSink>,
    sampler: Mutex<RngSampler<StdRng>>,
}

impl RunController {
    pub fn new(config: &BackfillConfig, storage: Storage) -> Self {
        let rng = match config.generation.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            profiles: config.equipment.clone(),
            interval: config.generation.interval(),
            epoch_start: config.generation.epoch_start,
            workers: config.sink.workers.max(1),
            checkpoints: storage.checkpoints,
            sink: storage.sink,
            sampler: Mutex::new(RngSampler::new(rng)),
        }
    }

    /// Catch up every reading due before `now`.
    ///
    /// The checkpoint is saved only after every batch write succeeded; any
    /// write failure returns an error and leaves the stored checkpoint as it was.
    pub async fn execute(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let run_id = Uuid::now_v7();
        let span = info_span!("run", run_id = %run_id);
        self.execute_inner(run_id, now).instrument(span).await
    }

    async fn execute_inner(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<RunReport> {
        let anomaly_enabled = self.load_anomaly_policy().await?;
        let checkpoint = self.load_checkpoint().await?;

        info!(
            now = %now,
            checkpoint = %format_timestamp(&checkpoint.last_timestamp),
            entities = checkpoint.entity_count(),
            anomaly_enabled = anomaly_enabled,
            "Starting catch-up"
        );

        // Sampler guard must drop before the first await below
        let catch_up = {
            let mut sampler = self
                .sampler
                .lock()
                .map_err(|_| anyhow!("Sampler mutex poisoned"))?;
            CatchUpEngine::new(&self.profiles, self.interval).run(
                &checkpoint,
                now,
                anomaly_enabled,
                &mut *sampler,
            )?
        };

        let readings_written = catch_up.reading_count();
        let batches_written = catch_up.batches.len();

        self.flush(catch_up.batches).await?;

        self.checkpoints
            .save_checkpoint(&catch_up.checkpoint)
            .await
            .context("Failed to save checkpoint")?;

        let report = RunReport {
            run_id,
            anomaly_enabled,
            batches_written,
            readings_written,
            checkpoint_timestamp: catch_up.checkpoint.last_timestamp,
        };

        info!(
            batches = report.batches_written,
            readings = report.readings_written,
            checkpoint = %format_timestamp(&report.checkpoint_timestamp),
            "Catch-up complete"
        );

        Ok(report)
    }

    async fn load_anomaly_policy(&self) -> Result<bool> {
        let stored = self
            .checkpoints
            .load_anomaly_policy()
            .await
            .context("Failed to load anomaly policy")?;

        match stored {
            Some(enabled) => Ok(enabled),
            None => {
                self.checkpoints
                    .save_anomaly_policy(false)
                    .await
                    .context("Failed to persist default anomaly policy")?;
                info!("No anomaly policy stored, defaulting to disabled");
                Ok(false)
            }
        }
    }

    async fn load_checkpoint(&self) -> Result<Checkpoint> {
        let stored = self
            .checkpoints
            .load_checkpoint()
            .await
            .context("Failed to load checkpoint")?;

        match stored {
            Some(checkpoint) => Ok(checkpoint),
            None => {
                info!(
                    epoch_start = %format_timestamp(&self.epoch_start),
                    "No checkpoint found, starting from epoch"
                );
                Ok(Checkpoint::initial(
                    &self.profiles,
                    self.epoch_start,
                    self.interval,
                ))
            }
        }
    }

    /// Deliver every batch; returns once all writes have finished
    async fn flush(&self, batches: Vec<WriteBatch>) -> Result<()> {
        if self.workers <= 1 {
            for batch in &batches {
                self.sink
                    .write_batch(batch)
                    .await
                    .with_context(|| batch_error(batch))?;
            }
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for batch in batches {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("Batch writer pool closed")?;
            let sink = Arc::clone(&self.sink);

            tasks.spawn(async move {
                let _permit = permit;
                sink.write_batch(&batch)
                    .await
                    .with_context(|| batch_error(&batch))
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .context("Batch writer task panicked")
                .and_then(|written| written);
            if let Err(e) = result {
                error!(error = %format!("{:#}", e), "Batch write failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn batch_error(batch: &WriteBatch) -> String {
    format!("Failed to write batch {}", format_timestamp(&batch.timestamp))
}
