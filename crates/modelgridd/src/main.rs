//! modelgridd — the ModelGrid daemon.
//!
//! Single binary that assembles the ModelGrid services:
//! - State store (redb)
//! - Version store
//! - Performance monitor + notification delivery
//! - A/B test engine
//! - Deployment controller
//! - Update scheduler + performance triggers
//! - Version retention
//!
//! # Usage
//!
//! ```text
//! modelgridd run --config modelgrid.toml --data-dir /var/lib/modelgrid
//! modelgridd config --config modelgrid.toml
//! ```

mod provider;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use modelgrid_abtest::AbTestEngine;
use modelgrid_core::{InferenceProvider, ModelGridConfig, SharedClock, SystemClock};
use modelgrid_monitor::{LogSink, NotificationSink, PerformanceMonitor, spawn_delivery};
use modelgrid_rollout::{DeploymentController, HealthSource};
use modelgrid_scheduler::{UpdateScheduler, ValidationPipeline};
use modelgrid_state::{StateStore, VersionStore};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::provider::UnconfiguredProvider;

#[derive(Parser)]
#[command(name = "modelgridd", about = "ModelGrid daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run every service in this process until Ctrl-C.
    Run {
        /// Configuration file; defaults apply when it does not exist.
        #[arg(long, default_value = "modelgrid.toml")]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/modelgrid")]
        data_dir: PathBuf,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long, default_value = "modelgrid.toml")]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,modelgrid=debug,modelgridd=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, data_dir } => run(&config, data_dir).await,
        Command::Config { config } => {
            let config = ModelGridConfig::load_or_default(&config)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config_path: &Path, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("ModelGrid daemon starting");

    let config = ModelGridConfig::load_or_default(config_path)?;
    info!(path = ?config_path, "configuration loaded");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("modelgrid.redb");

    // ── Initialize services ────────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let clock: SharedClock = Arc::new(SystemClock);
    let provider: Arc<dyn InferenceProvider> = Arc::new(UnconfiguredProvider);

    let versions = Arc::new(VersionStore::new(Arc::new(state.clone()), clock.clone()));

    let monitor = Arc::new(PerformanceMonitor::new(
        config.monitor.clone(),
        state.clone(),
        clock.clone(),
    )?);
    info!(
        interval = config.monitor.evaluation_interval_secs,
        window = config.monitor.window_secs,
        "performance monitor initialized"
    );

    let abtests = Arc::new(AbTestEngine::new(
        config.abtest.clone(),
        state.clone(),
        clock.clone(),
    )?);
    info!("a/b test engine initialized");

    let controller = Arc::new(DeploymentController::new(
        config.rollout.clone(),
        state.clone(),
        clock.clone(),
        versions.clone(),
        monitor.clone() as Arc<dyn HealthSource>,
        abtests,
        provider.clone(),
    )?);
    info!("deployment controller initialized");

    let pipeline = ValidationPipeline::new(Duration::from_secs(
        config.scheduler.validation_timeout_secs,
    ))
    .with_provider(provider);
    let scheduler = Arc::new(UpdateScheduler::new(
        config.scheduler.clone(),
        state,
        clock,
        versions.clone(),
        controller.clone(),
        pipeline,
    )?);
    info!(
        max_concurrent = config.scheduler.max_concurrent_updates,
        "update scheduler initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
    let delivery_handle = spawn_delivery(monitor.subscribe(), sinks, shutdown_rx.clone());

    let controller_events = monitor.subscribe();
    let controller_shutdown = shutdown_rx.clone();
    let controller_handle = tokio::spawn(async move {
        controller.run(controller_events, controller_shutdown).await;
    });

    let alerts_handle = tokio::spawn(
        Arc::clone(&scheduler).watch_alerts(monitor.subscribe(), shutdown_rx.clone()),
    );

    let retention = config.retention.clone();
    let retention_shutdown = shutdown_rx.clone();
    let retention_handle = tokio::spawn(async move {
        versions.run_retention(retention, retention_shutdown).await;
    });

    let monitor_shutdown = shutdown_rx.clone();
    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    info!("ModelGrid daemon running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Wait for background tasks.
    let _ = monitor_handle.await;
    let _ = controller_handle.await;
    let _ = scheduler_handle.await;
    let _ = alerts_handle.await;
    let _ = retention_handle.await;
    let _ = delivery_handle.await;

    info!("ModelGrid daemon stopped");
    Ok(())
}
