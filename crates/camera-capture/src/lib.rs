//! Frame Sources for Meteor Acquisition
//!
//! Provides the `FrameSource` boundary used by the acquisition thread.
//! Supports:
//! - Simulated camera (moving bright square over a dark sky)
//! - Directory of still frames (PNG/BMP/TIFF, 8 or 16 bit grey)

pub mod directory;
pub mod frame;
pub mod simulated;

pub use directory::FrameDirectorySource;
pub use frame::{BitDepth, Frame};
pub use simulated::{SimulatedCamera, SimulationConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open source: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Grab failed: {0}")]
    Grab(String),

    #[error("Capture timeout")]
    Timeout,

    #[error("End of stream")]
    EndOfStream,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Whether the acquisition loop should keep going after this error.
    /// An undecodable frame is skipped like a dropped one.
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::Grab(_) | CameraError::Timeout | CameraError::Format(_))
    }
}

/// Anything that produces frames for the acquisition thread.
///
/// `grab_image` may block; implementations return an owned frame.
pub trait FrameSource {
    /// Grab the next frame
    fn grab_image(&mut self) -> Result<Frame, CameraError>;

    /// Frames left before the source runs dry, 0 when unbounded
    fn frames_remaining(&self) -> u64;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Source selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Synthetic moving-square sequence
    Simulated(SimulationConfig),
    /// Ordered still frames read from a directory
    Directory {
        path: PathBuf,
        /// Nominal rate used to stamp frames
        #[serde(default = "default_directory_fps")]
        fps: f64,
    },
}

fn default_directory_fps() -> f64 {
    25.0
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Simulated(SimulationConfig::default())
    }
}

/// Open the configured source
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource + Send>, CameraError> {
    match config {
        SourceConfig::Simulated(sim) => Ok(Box::new(SimulatedCamera::new(sim.clone())?)),
        SourceConfig::Directory { path, fps } => {
            Ok(Box::new(FrameDirectorySource::open(path, *fps)?))
        }
    }
}
