use anyhow::{Context, Result};
use facegate_core::MatchEngine;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use config::{BusKind, Config};
use dbus_interface::AttendanceService;

const BUS_NAME: &str = "org.facegate.Attendance1";
const OBJECT_PATH: &str = "/org/facegate/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        db = %config.db_path.display(),
        face_distance = config.thresholds.face_distance,
        min_liveness = config.thresholds.min_liveness,
        duplicate_distance = config.thresholds.duplicate_distance,
        length_policy = ?config.thresholds.length_policy,
        descriptor_dim = ?config.descriptor_dim,
        "configuration loaded"
    );

    let store = store::Store::open(&config.db_path)
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;
    let engine = engine::spawn_engine(store, MatchEngine::new(config.thresholds))?;

    let service = AttendanceService::new(
        engine,
        config.thresholds,
        config.history_limit,
        config.log_limit,
        config.descriptor_dim,
    );

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "facegated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
