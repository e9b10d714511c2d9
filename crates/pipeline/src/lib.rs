//! Meteor Station Pipeline
//!
//! Wires the acquisition, detection, recorder and stack-writer threads
//! together from one `Settings` value, and owns process-wide concerns:
//! logging, metrics export and stall supervision.

mod detect;
mod pipeline;
pub mod settings;

pub use detect::{DetectionHandle, DetectionSummary, DetectionWorker};
pub use pipeline::{supervise, Pipeline, PipelineHandle, PipelineReport};
pub use settings::{LoggingSettings, MetricsSettings, Settings};

use std::net::SocketAddr;
use thiserror::Error;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Camera error: {0}")]
    Camera(#[from] camera_capture::CameraError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] frame_buffer::BufferError),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] acquisition::AcquisitionError),

    #[error("Detection error: {0}")]
    Detection(#[from] detection::DetectionError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] event_recorder::RecorderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Metrics exporter failed: {0}")]
    Metrics(String),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Initialize logging
pub fn init_logging(settings: &LoggingSettings) -> Result<(), PipelineError> {
    let level: Level = settings
        .level
        .parse()
        .map_err(|_| PipelineError::Logging(format!("unknown level '{}'", settings.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_names(true);

    let result = if settings.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| PipelineError::Logging(e.to_string()))
}

/// Install the Prometheus exporter when a listen address is configured
pub fn install_metrics(settings: &MetricsSettings) -> Result<(), PipelineError> {
    let Some(listen) = &settings.listen else {
        return Ok(());
    };
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| PipelineError::Metrics(format!("invalid listen address '{}': {}", listen, e)))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::Metrics(e.to_string()))?;

    info!("Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}
