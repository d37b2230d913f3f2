use super::*;
use crate::config::BackfillConfig;
use crate::model::{Checkpoint, EntityState, WriteBatch};
use crate::store::{CheckpointStore, ReadingSink, Storage};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 10, 23, hour, minute, second).unwrap()
}

/// In-memory store that can be told to reject one batch timestamp
#[derive(Default)]
struct MemoryStore {
    checkpoint: Mutex<Option<Checkpoint>>,
    anomaly: Mutex<Option<bool>>,
    batches: Mutex<Vec<WriteBatch>>,
    checkpoint_saves: AtomicUsize,
    fail_at: Option<DateTime<Utc>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryStore {
    fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint: Mutex::new(Some(checkpoint)),
            ..Default::default()
        }
    }

    fn written_timestamps(&self) -> Vec<DateTime<Utc>> {
        let mut timestamps: Vec<_> = self
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(|b| b.timestamp)
            .collect();
        timestamps.sort();
        timestamps
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoint.lock().unwrap().clone())
    }

    async fn load_anomaly_policy(&self) -> Result<Option<bool>> {
        Ok(*self.anomaly.lock().unwrap())
    }

    async fn save_anomaly_policy(&self, enabled: bool) -> Result<()> {
        *self.anomaly.lock().unwrap() = Some(enabled);
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoint_saves.fetch_add(1, Ordering::SeqCst);
        *self.checkpoint.lock().unwrap() = Some(checkpoint.clone());
        Ok(())
    }
}

#[async_trait]
impl ReadingSink for MemoryStore {
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_at == Some(batch.timestamp) {
            bail!("sink unavailable");
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

fn config(workers: usize) -> BackfillConfig {
    let mut config = BackfillConfig::default();
    config.generation.epoch_start = at(13, 0, 0);
    config.generation.seed = Some(7);
    config.sink.workers = workers;
    config
}

fn controller(store: &Arc<MemoryStore>, workers: usize) -> RunController {
    RunController::new(&config(workers), Storage::from_adapter(Arc::clone(store)))
}

fn single(tag: &str, last: DateTime<Utc>) -> Checkpoint {
    Checkpoint::new(last, vec![EntityState::new(tag.into(), last, Some(13.3))])
}

#[tokio::test]
async fn test_first_run_starts_from_epoch() {
    let store = Arc::new(MemoryStore::default());
    let controller = controller(&store, 1);

    let report = controller.execute(at(13, 5, 10)).await.unwrap();

    // Default anomaly record is persisted
    assert_eq!(*store.anomaly.lock().unwrap(), Some(false));
    assert!(!report.anomaly_enabled);

    // 12:59 synthesized checkpoint -> 13:00 .. 13:05
    assert_eq!(report.batches_written, 6);
    assert_eq!(report.readings_written, 6 * 12);
    assert_eq!(report.checkpoint_timestamp, at(13, 5, 0));
    assert_eq!(store.written_timestamps().first(), Some(&at(13, 0, 0)));

    let saved = store.checkpoint.lock().unwrap().clone().unwrap();
    assert_eq!(saved.last_timestamp, at(13, 5, 0));
    assert_eq!(saved.entity_count(), 12);
}

#[tokio::test]
async fn test_sequential_flush_is_ascending() {
    let store = Arc::new(MemoryStore::with_checkpoint(single(
        "turbine_pressure",
        at(13, 30, 0),
    )));
    let controller = controller(&store, 1);

    let report = controller.execute(at(13, 33, 30)).await.unwrap();
    assert_eq!(report.batches_written, 3);

    let order: Vec<_> = store
        .batches
        .lock()
        .unwrap()
        .iter()
        .map(|b| b.timestamp)
        .collect();
    assert_eq!(order, vec![at(13, 31, 0), at(13, 32, 0), at(13, 33, 0)]);
    assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stored_anomaly_policy_is_used() {
    let store = Arc::new(MemoryStore::with_checkpoint(single(
        "turbine_pressure",
        at(13, 30, 0),
    )));
    *store.anomaly.lock().unwrap() = Some(true);
    let controller = controller(&store, 1);

    let report = controller.execute(at(13, 31, 30)).await.unwrap();
    assert!(report.anomaly_enabled);
    assert_eq!(*store.anomaly.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn test_failed_batch_leaves_checkpoint_untouched() {
    let original = single("turbine_pressure", at(13, 30, 0));
    let store = Arc::new(MemoryStore {
        fail_at: Some(at(13, 32, 0)),
        ..MemoryStore::with_checkpoint(original.clone())
    });
    let controller = controller(&store, 1);

    let err = controller.execute(at(13, 33, 30)).await.unwrap_err();
    assert!(format!("{:#}", err).contains("sink unavailable"));
    assert!(err.to_string().contains("2020-10-23T13:32:00Z"));

    assert_eq!(store.checkpoint_saves.load(Ordering::SeqCst), 0);
    assert_eq!(store.checkpoint.lock().unwrap().clone(), Some(original));
    // Sequential flush stops at the failing batch
    assert_eq!(store.written_timestamps(), vec![at(13, 31, 0)]);
}

#[tokio::test]
async fn test_pooled_flush_failure_waits_for_all_writers() {
    let original = single("engine_humidity", at(13, 0, 0));
    let store = Arc::new(MemoryStore {
        fail_at: Some(at(13, 3, 0)),
        ..MemoryStore::with_checkpoint(original.clone())
    });
    let controller = controller(&store, 4);

    assert!(controller.execute(at(13, 10, 30)).await.is_err());

    assert_eq!(store.checkpoint.lock().unwrap().clone(), Some(original));
    assert_eq!(store.checkpoint_saves.load(Ordering::SeqCst), 0);
    // Every other batch still landed before the run reported failure
    assert_eq!(store.written_timestamps().len(), 9);
    assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pooled_flush_is_bounded() {
    let store = Arc::new(MemoryStore::with_checkpoint(single(
        "booster_temperature",
        at(12, 0, 0),
    )));
    let controller = controller(&store, 3);

    let report = controller.execute(at(12, 30, 30)).await.unwrap();

    assert_eq!(report.batches_written, 30);
    let expected: Vec<_> = (1..=30).map(|m| at(12, m, 0)).collect();
    assert_eq!(store.written_timestamps(), expected);
    assert!(store.max_in_flight.load(Ordering::SeqCst) <= 3);
    assert_eq!(store.checkpoint_saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_without_work_still_saves_checkpoint() {
    let checkpoint = single("engine_temperature", at(13, 33, 0));
    let store = Arc::new(MemoryStore::with_checkpoint(checkpoint.clone()));
    let controller = controller(&store, 1);

    let report = controller.execute(at(13, 34, 0)).await.unwrap();

    assert_eq!(report.batches_written, 0);
    assert_eq!(report.readings_written, 0);
    assert_eq!(report.checkpoint_timestamp, at(13, 33, 0));
    assert_eq!(store.checkpoint_saves.load(Ordering::SeqCst), 1);
    assert_eq!(store.checkpoint.lock().unwrap().clone(), Some(checkpoint));
}

#[tokio::test]
async fn test_second_run_resumes_from_saved_checkpoint() {
    let store = Arc::new(MemoryStore::with_checkpoint(single(
        "main_valve_pressure",
        at(13, 0, 0),
    )));
    let controller = controller(&store, 1);

    controller.execute(at(13, 2, 30)).await.unwrap();
    let report = controller.execute(at(13, 5, 30)).await.unwrap();

    assert_eq!(report.batches_written, 3);
    let expected: Vec<_> = (1..=5).map(|m| at(13, m, 0)).collect();
    assert_eq!(store.written_timestamps(), expected);
}

#[tokio::test]
async fn test_unknown_equipment_fails_run() {
    let store = Arc::new(MemoryStore::with_checkpoint(single(
        "flux_capacitor",
        at(13, 0, 0),
    )));
    let controller = controller(&store, 1);

    let err = controller.execute(at(13, 5, 0)).await.unwrap_err();
    assert!(err.to_string().contains("flux_capacitor"));
    assert!(store.batches.lock().unwrap().is_empty());
    assert_eq!(store.checkpoint_saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_repeated_checkpoint_tag_fails_without_writes() {
    let state = EntityState::new("turbine_pressure".into(), at(13, 30, 0), Some(13.0));
    let original = Checkpoint::new(at(13, 30, 0), vec![state.clone(), state]);
    let store = Arc::new(MemoryStore::with_checkpoint(original.clone()));
    let controller = controller(&store, 1);

    let err = controller.execute(at(13, 32, 30)).await.unwrap_err();
    assert!(err.to_string().contains("turbine_pressure"));
    assert!(store.batches.lock().unwrap().is_empty());
    assert_eq!(store.checkpoint_saves.load(Ordering::SeqCst), 0);
    assert_eq!(store.checkpoint.lock().unwrap().clone(), Some(original));
}

#[tokio::test]
async fn test_scheduler_status_tracks_runs() {
    let minute = Utc::now()
        .duration_trunc(Duration::minutes(1))
        .unwrap();
    let store = Arc::new(MemoryStore::with_checkpoint(single(
        "turbine_humidity",
        minute - Duration::minutes(3),
    )));
    let scheduler = Scheduler::new(Arc::new(controller(&store, 1)), 60);

    let report = scheduler.run_once().await.unwrap();

    let status = scheduler.status();
    let status = status.lock().await;
    assert_eq!(status.run_count, 1);
    assert_eq!(status.error_count, 0);
    assert!(status.last_run.is_some());
    assert!(status.last_error.is_none());
    assert_eq!(status.last_report.as_ref(), Some(&report));
}

#[tokio::test]
async fn test_scheduler_status_records_failures() {
    let store = Arc::new(MemoryStore::with_checkpoint(single(
        "flux_capacitor",
        at(13, 0, 0),
    )));
    let scheduler = Scheduler::new(Arc::new(controller(&store, 1)), 60);

    assert!(scheduler.run_once().await.is_err());

    let status = scheduler.status();
    let status = status.lock().await;
    assert_eq!(status.run_count, 0);
    assert_eq!(status.error_count, 1);
    assert!(status
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("flux_capacitor"));
}
