//! Pipeline settings
//!
//! Aggregates the per-crate configuration structs. Loaded from an optional
//! TOML file, then overridden by `METEOR__<SECTION>__<KEY>` environment
//! variables.

use crate::PipelineError;
use acquisition::AcquisitionConfig;
use camera_capture::SourceConfig;
use detection::DetectionConfig;
use event_recorder::RecorderConfig;
use frame_buffer::StackConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "METEOR";

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Metrics settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Address of the Prometheus scrape endpoint, e.g. `0.0.0.0:9000`
    pub listen: Option<String>,
}

/// Complete pipeline settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
    pub source: SourceConfig,
    pub acquisition: AcquisitionConfig,
    pub stack: StackConfig,
    pub detection: DetectionConfig,
    pub recorder: RecorderConfig,
}

impl Settings {
    /// Load settings from `path` (if any) and the `METEOR__*` environment
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Load settings with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, PipelineError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Cross-section consistency checks
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.detection.validate()?;
        self.stack.validate()?;

        if self.acquisition.ring_capacity == 0 {
            return Err(PipelineError::Settings("acquisition.ring_capacity must be > 0".into()));
        }
        if self.recorder.enabled {
            let needed = self.detection.time_before_frames + self.detection.time_after_frames + 1;
            if (self.acquisition.ring_capacity as u64) < needed {
                return Err(PipelineError::Settings(format!(
                    "acquisition.ring_capacity {} cannot hold an event window of {} frames",
                    self.acquisition.ring_capacity, needed
                )));
            }
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(PipelineError::Settings(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}
