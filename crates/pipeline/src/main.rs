//! OBD-II Pipeline - Main Entry Point

use pipeline::{init_logging, load_config, run, DEFAULT_CONFIG_PATH};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OBD_PIPELINE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&path)?;
    init_logging(&config.logging)?;

    info!("=== OBD-II Pipeline v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {}", path);

    let summary = run(config).await?;
    info!(
        "Session {} for vehicle {} stored {} records",
        summary.session_id, summary.vehicle_id, summary.records_stored
    );

    Ok(())
}
