use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_backfill::config::{load_config, BackfillConfig, RuntimeOverrides};
use telemetry_backfill::run::{RunController, Scheduler};
use telemetry_backfill::store::open_storage;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_backfill=info".into()),
        )
        .init();

    info!("Telemetry backfill starting...");

    let mut config = match std::env::var("BACKFILL_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        Err(_) => {
            info!("BACKFILL_CONFIG not set, using defaults");
            BackfillConfig::default()
        }
    };

    RuntimeOverrides::from_env().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        equipment = config.equipment.len(),
        interval_secs = config.generation.interval_seconds,
        schedule_secs = config.schedule.interval_seconds,
        workers = config.sink.workers,
        run_once = config.schedule.run_once,
        "Configuration loaded"
    );

    let storage = open_storage(&config.storage)?;
    let controller = Arc::new(RunController::new(&config, storage));
    let scheduler = Scheduler::new(controller, config.schedule.interval_seconds);

    if config.schedule.run_once {
        let report = scheduler.run_once().await?;
        info!(
            run_id = %report.run_id,
            batches = report.batches_written,
            readings = report.readings_written,
            "Single run finished"
        );
        return Ok(());
    }

    tokio::select! {
        _ = scheduler.run_loop() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl_c signal")?;
            info!("Shutdown signal received");
        }
    }

    let status = scheduler.status();
    let status = status.lock().await;
    info!(
        runs = status.run_count,
        errors = status.error_count,
        "Telemetry backfill stopped"
    );

    Ok(())
}
