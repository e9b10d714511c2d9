//! Event Recorder
//!
//! Persists confirmed detections and frame stacks off the detection path:
//! - `EventRecorder` boundary and the directory-based implementation
//! - Queue between the detection thread and the recorder thread
//! - Recording status log with retention
//! - Stack writer consuming the stacked-frames ring

mod queue;
mod recorder;
mod stack_writer;
mod status;
mod worker;

pub use queue::{Popped, RecorderQueue};
pub use recorder::{DirectoryRecorder, EventMetadata, EventRecorder, RecordingOutcome};
pub use stack_writer::{write_stack, StackWriter, StackWriterHandle};
pub use status::{RecordingLog, RecordingState, RecordingStatus};
pub use worker::{RecorderHandle, RecorderSummary, RecorderWorker};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Recorder errors
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Recorder unavailable: {0}")]
    Unavailable(String),
}

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Record confirmed events at all
    pub enabled: bool,
    /// Root directory for event recordings
    pub output_dir: PathBuf,
    /// Write the frames of the event window
    pub save_frames: bool,
    /// Write the annotated preview images
    pub save_previews: bool,
    /// Events waiting for the recorder before the oldest is dropped
    pub queue_capacity: usize,
    /// How long to wait for the end of an event window to be acquired (ms)
    pub window_timeout_ms: u64,
    /// Entries kept in the recording status log
    pub log_retention: usize,
    /// Directory for frame stacks
    pub stack_dir: PathBuf,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("recordings/events"),
            save_frames: true,
            save_previews: true,
            queue_capacity: 16,
            window_timeout_ms: 10_000,
            log_retention: 1000,
            stack_dir: PathBuf::from("recordings/stacks"),
        }
    }
}
