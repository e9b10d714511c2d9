//! Meteor Station Pipeline - Main Entry Point
//!
//! Usage: `meteor-pipeline [settings.toml]`

use pipeline::{init_logging, install_metrics, supervise, Pipeline, Settings};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(settings_path.as_deref())?;
    init_logging(&settings.logging)?;

    info!("=== Meteor Pipeline v{} ===", env!("CARGO_PKG_VERSION"));
    install_metrics(&settings.metrics)?;

    let handle = Pipeline::new(settings)?.start()?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, stopping acquisition");
            handle.stop();
        }
        _ = supervise(&handle, Duration::from_secs(1)) => {}
    }

    let report = tokio::task::spawn_blocking(move || handle.join()).await??;
    info!(
        "Done: {} frames grabbed, {} events confirmed, {} recorded",
        report.acquisition.frames_grabbed,
        report.detection.confirmed,
        report.recorder.map_or(0, |r| r.recorded)
    );

    Ok(())
}
