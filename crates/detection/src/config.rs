//! Detection configuration

use crate::palette::PALETTE;
use crate::DetectionError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Process frames at half resolution
    pub downsample: bool,

    /// Static mask image (non-zero = processed), full frame resolution
    pub mask_path: Option<PathBuf>,

    /// Threshold map grid (rows x cols)
    pub grid_rows: usize,
    pub grid_cols: usize,

    /// Side of the square ROI grown around each detected pixel (full-resolution pixels)
    pub roi_size: usize,

    /// Local events per cycle
    pub max_local_events: usize,

    /// Tracks alive at once
    pub max_global_events: usize,

    /// Cycles without a new local event before a track is evaluated
    pub silence_bound: u32,

    /// Cycles after which a track is discarded regardless of content
    pub max_age: u32,

    /// Local events a track needs to be confirmed
    pub min_track_length: usize,

    /// Finite sources: evaluate tracks early once fewer frames remain
    pub end_of_stream_margin: u64,

    /// Trailing positions that must all show continuous motion
    pub continuity_window: usize,

    /// Max distance from the first position for a track to count as static (pixels)
    pub static_tolerance_px: f64,

    /// Max perpendicular distance to the fitted line for a linear track (pixels)
    pub linear_tolerance_px: f64,

    /// Smallest displacement counted as motion (pixels)
    pub min_step_px: f64,

    /// Max angle between a step and the track direction (degrees)
    pub continuity_max_angle_deg: f64,

    /// Attach a local event to every intersecting track instead of the first one
    pub multi_attach: bool,

    /// Preview images kept per track
    pub preview_capacity: usize,

    /// Frames recorded before the first frame of a confirmed event
    pub time_before_frames: u64,

    /// Frames recorded after the last frame of a confirmed event
    pub time_after_frames: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            downsample: true,
            mask_path: None,
            grid_rows: 8,
            grid_cols: 8,
            roi_size: 10,
            max_local_events: 20,
            max_global_events: 20,
            silence_bound: 5,
            max_age: 400,
            min_track_length: 10,
            end_of_stream_margin: 10,
            continuity_window: 10,
            static_tolerance_px: 3.0,
            linear_tolerance_px: 3.0,
            min_step_px: 0.5,
            continuity_max_angle_deg: 60.0,
            multi_attach: true,
            preview_capacity: 10,
            time_before_frames: 25,
            time_after_frames: 25,
        }
    }
}

impl DetectionConfig {
    /// Full-resolution processing, for small frames and tests
    pub fn full_resolution() -> Self {
        Self {
            downsample: false,
            ..Default::default()
        }
    }

    /// Shorter tracks and tighter silence, for fast meteors at low frame rates
    pub fn sensitive() -> Self {
        Self {
            silence_bound: 3,
            min_track_length: 5,
            continuity_window: 5,
            ..Default::default()
        }
    }

    /// Reject configurations the detector cannot run with
    pub fn validate(&self) -> Result<(), DetectionError> {
        let fail = |msg: String| Err(DetectionError::Config(msg));

        if self.grid_rows == 0 || self.grid_cols == 0 {
            return fail(format!("grid {}x{} must be non-empty", self.grid_rows, self.grid_cols));
        }
        if self.roi_size == 0 {
            return fail("roi_size must be > 0".into());
        }
        if self.max_local_events == 0 || self.max_local_events > PALETTE.len() {
            return fail(format!(
                "max_local_events must be in 1..={}, got {}",
                PALETTE.len(),
                self.max_local_events
            ));
        }
        if self.max_global_events == 0 || self.max_global_events > PALETTE.len() {
            return fail(format!(
                "max_global_events must be in 1..={}, got {}",
                PALETTE.len(),
                self.max_global_events
            ));
        }
        if self.min_track_length == 0 || self.continuity_window == 0 {
            return fail("min_track_length and continuity_window must be > 0".into());
        }
        for (name, value) in [
            ("static_tolerance_px", self.static_tolerance_px),
            ("linear_tolerance_px", self.linear_tolerance_px),
            ("min_step_px", self.min_step_px),
        ] {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("{} must be finite and >= 0, got {}", name, value));
            }
        }
        if !(self.continuity_max_angle_deg > 0.0 && self.continuity_max_angle_deg <= 180.0) {
            return fail(format!(
                "continuity_max_angle_deg must be in (0, 180], got {}",
                self.continuity_max_angle_deg
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(DetectionConfig::default().validate().is_ok());
        assert!(DetectionConfig::full_resolution().validate().is_ok());
        assert!(DetectionConfig::sensitive().validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_budget() {
        let config = DetectionConfig {
            max_local_events: PALETTE.len() + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DetectionError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_angle() {
        let config = DetectionConfig {
            continuity_max_angle_deg: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: DetectionConfig = serde_json::from_str(r#"{"roi_size": 6}"#).unwrap();
        assert_eq!(config.roi_size, 6);
        assert_eq!(config.max_age, 400);
    }
}
