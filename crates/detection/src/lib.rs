//! Meteor Detection
//!
//! Frame-pair change detection with temporal confirmation:
//! - Region thresholding with two-cycle confirmation and noise filtering
//! - Grouping of changed pixels into local events through growing ROIs
//! - Tracking of local events across cycles as global events
//! - Confirmation of tracks that move along a line or continuously

pub mod config;
pub mod context;
pub mod geometry;
pub mod global_event;
pub mod image_ops;
pub mod lifecycle;
pub mod local_event;
pub mod palette;
pub mod threshold;
pub mod tracker;

pub use config::DetectionConfig;
pub use context::{
    load_mask, run_detection_cycle, ConfirmedEvent, CycleStats, DetectionContext, FrameWindow,
};
pub use geometry::{Position, Roi, Scale};
pub use global_event::{GlobalEvent, TrackHeuristics};
pub use lifecycle::{GlobalEventLifecycleManager, TrackOutcome};
pub use local_event::{LocalEvent, PixelEvent};
pub use palette::{ColorPool, ColorTag, PALETTE};
pub use threshold::{RegionThresholder, ThresholdMap};
pub use tracker::LocalEventTracker;

use thiserror::Error;

/// Detection error types
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mask size {mask:?} does not match frame size {frame:?}")]
    MaskSizeMismatch {
        mask: (usize, usize),
        frame: (usize, usize),
    },

    #[error("Frame size {current:?} differs from previous frame {previous:?}")]
    FrameSizeMismatch {
        current: (usize, usize),
        previous: (usize, usize),
    },

    #[error("Mask loading failed: {0}")]
    MaskLoad(String),
}

impl DetectionError {
    /// Errors that stop the detection thread; the rest skip one cycle
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DetectionError::FrameSizeMismatch { .. })
    }
}
