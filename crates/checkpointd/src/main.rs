use anyhow::Result;
use checkpoint_core::HeuristicVerifier;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};

const BUS_NAME: &str = "org.checkpoint.Checkpoint1";
const OBJECT_PATH: &str = "/org/checkpoint/Checkpoint1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("checkpointd starting");

    let config = Config::from_env();
    let policy = config.load_policy()?;
    let locations = Arc::new(config.load_locations()?);
    let timeout = Duration::from_secs(config.verify_timeout_secs);
    tracing::info!(
        policy_version = policy.version,
        default_tier = %config.default_tier,
        locations = locations.len(),
        timeout_secs = config.verify_timeout_secs,
        "configuration loaded"
    );
    if locations.is_empty() {
        tracing::warn!("no locations configured; geofencing disabled for checkpoints");
    }

    let policy_version = policy.version;
    let verifier = HeuristicVerifier::new(policy).with_budget(timeout);
    let engine = engine::spawn_engine(verifier, Arc::clone(&locations))?;

    let service = dbus_interface::CheckpointService::new(
        engine,
        locations,
        config.default_tier,
        policy_version,
        timeout,
    );

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "checkpointd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("checkpointd shutting down");

    Ok(())
}
