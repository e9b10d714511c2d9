//! Simulated camera
//!
//! Draws a bright square moving over a dark background. Used to exercise
//! the detection chain without hardware.

use crate::{BitDepth, CameraError, Frame, FrameSource};
use chrono::{Duration, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Simulated camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Frame width
    pub width: usize,
    /// Frame height
    pub height: usize,
    /// Side of the bright square
    pub square_size: usize,
    /// Top-left corner of the square in the first frame
    pub start: (i64, i64),
    /// Displacement per frame
    pub step: (i64, i64),
    /// Number of frames during which the square moves; it holds still afterwards
    pub moving_frames: u64,
    /// Total frames to produce, 0 for an endless stream
    pub total_frames: u64,
    /// Background level
    pub background: u16,
    /// Square level
    pub intensity: u16,
    /// Sensor depth
    pub bit_depth: BitDepth,
    /// Nominal frame rate
    pub fps: f64,
    /// Exposure stamped on each frame (microseconds)
    pub exposure_us: f64,
    /// Gain stamped on each frame
    pub gain: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            square_size: 3,
            start: (10, 10),
            step: (5, 5),
            moving_frames: 60,
            total_frames: 0,
            background: 0,
            intensity: 255,
            bit_depth: BitDepth::Mono8,
            fps: 30.0,
            exposure_us: 33_000.0,
            gain: 1.0,
        }
    }
}

/// Moving-square frame generator
pub struct SimulatedCamera {
    config: SimulationConfig,
    produced: u64,
    started: chrono::DateTime<Utc>,
}

impl SimulatedCamera {
    /// Create a simulated camera
    pub fn new(config: SimulationConfig) -> Result<Self, CameraError> {
        if config.width == 0 || config.height == 0 {
            return Err(CameraError::Open(format!(
                "invalid simulated geometry {}x{}",
                config.width, config.height
            )));
        }
        if config.intensity > config.bit_depth.max_value() {
            return Err(CameraError::Format(format!(
                "intensity {} exceeds {:?} range",
                config.intensity, config.bit_depth
            )));
        }
        debug!("Simulated camera {}x{}", config.width, config.height);
        Ok(Self {
            config,
            produced: 0,
            started: Utc::now(),
        })
    }

    /// Top-left corner of the square in frame `index`
    pub fn square_origin(&self, index: u64) -> (i64, i64) {
        let moves = index.min(self.config.moving_frames.saturating_sub(1)) as i64;
        (
            self.config.start.0 + self.config.step.0 * moves,
            self.config.start.1 + self.config.step.1 * moves,
        )
    }

    fn render(&self, index: u64) -> Array2<u16> {
        let mut pixels = Array2::from_elem((self.config.height, self.config.width), self.config.background);
        let (x0, y0) = self.square_origin(index);
        let size = self.config.square_size as i64;
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                if x >= 0 && y >= 0 && (x as usize) < self.config.width && (y as usize) < self.config.height {
                    pixels[(y as usize, x as usize)] = self.config.intensity;
                }
            }
        }
        pixels
    }
}

impl FrameSource for SimulatedCamera {
    fn grab_image(&mut self) -> Result<Frame, CameraError> {
        if self.config.total_frames != 0 && self.produced >= self.config.total_frames {
            return Err(CameraError::EndOfStream);
        }

        let index = self.produced;
        self.produced += 1;

        let mut frame = Frame::new(self.render(index), self.config.bit_depth);
        let offset_us = if self.config.fps > 0.0 {
            (index as f64 * 1_000_000.0 / self.config.fps) as i64
        } else {
            0
        };
        frame.timestamp = self.started + Duration::microseconds(offset_us);
        frame.exposure_us = self.config.exposure_us;
        frame.gain = self.config.gain;
        frame.fps = self.config.fps;
        frame.frames_remaining = self.frames_remaining();
        Ok(frame)
    }

    fn frames_remaining(&self) -> u64 {
        if self.config.total_frames == 0 {
            0
        } else {
            self.config.total_frames.saturating_sub(self.produced)
        }
    }

    fn describe(&self) -> String {
        format!(
            "simulated {}x{} square={} step={:?}",
            self.config.width, self.config.height, self.config.square_size, self.config.step
        )
    }
}
