//! Frame Acquisition
//!
//! Runs one dedicated thread per source that grabs frames, pushes them into
//! the shared frame ring, feeds the stacking accumulator and publishes a
//! heartbeat for stall detection.

mod worker;

pub use worker::{
    AcquisitionConfig, AcquisitionHandle, AcquisitionSummary, AcquisitionThread, Heartbeat,
    StopFlag,
};

use thiserror::Error;

/// Acquisition errors
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// Thread could not be started
    #[error("Failed to spawn acquisition thread: {0}")]
    Spawn(String),

    /// Source failed in a way the loop cannot recover from
    #[error("Camera error: {0}")]
    Camera(#[from] camera_capture::CameraError),

    /// Invalid ring or stacking configuration
    #[error("Buffer error: {0}")]
    Buffer(#[from] frame_buffer::BufferError),

    /// Too many grabs in a row failed
    #[error("{0} consecutive grab failures")]
    TooManyFailures(u32),

    /// Thread panicked
    #[error("Acquisition thread panicked")]
    Panicked,
}
