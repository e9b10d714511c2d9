//! Frame types produced by every source

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Sample depth of the sensor that produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Mono8,
    Mono12,
    Mono16,
}

impl BitDepth {
    /// Number of significant bits per sample
    pub fn bits(self) -> u32 {
        match self {
            BitDepth::Mono8 => 8,
            BitDepth::Mono12 => 12,
            BitDepth::Mono16 => 16,
        }
    }

    /// Largest value a sample can take
    pub fn max_value(self) -> u16 {
        match self {
            BitDepth::Mono8 => u8::MAX as u16,
            BitDepth::Mono12 => 4095,
            BitDepth::Mono16 => u16::MAX,
        }
    }

    /// Whether samples need rescaling before 8-bit processing
    pub fn is_wide(self) -> bool {
        self.bits() > 8
    }
}

/// One grabbed image with its acquisition metadata.
///
/// Pixels are always stored as `u16` in `(row, col)` order, whatever the
/// sensor depth. A frame owns its pixel memory: sources must copy out of any
/// driver-owned buffer before handing a frame over.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Intensity samples, `height` rows by `width` columns
    pub pixels: Array2<u16>,
    /// Sensor depth
    pub bit_depth: BitDepth,
    /// Acquisition date (microsecond resolution)
    pub timestamp: DateTime<Utc>,
    /// Exposure time (microseconds)
    pub exposure_us: f64,
    /// Sensor gain
    pub gain: f64,
    /// Monotonic frame number, assigned by the acquisition loop
    pub number: u64,
    /// Frames left in a finite source, 0 for live cameras
    pub frames_remaining: u64,
    /// Saturation value for this depth
    pub saturation: u16,
    /// Capture rate
    pub fps: f64,
}

impl Frame {
    /// Create a frame with default metadata for the given pixels
    pub fn new(pixels: Array2<u16>, bit_depth: BitDepth) -> Self {
        Self {
            pixels,
            bit_depth,
            timestamp: Utc::now(),
            exposure_us: 0.0,
            gain: 0.0,
            number: 0,
            frames_remaining: 0,
            saturation: bit_depth.max_value(),
            fps: 0.0,
        }
    }

    /// Frame width in pixels
    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    /// Frame height in pixels
    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    /// `(height, width)` as used by ndarray
    pub fn dim(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    /// Sample at (x, y)
    pub fn get_pixel(&self, x: usize, y: usize) -> Option<u16> {
        self.pixels.get((y, x)).copied()
    }

    /// Whether this frame comes from a source that is about to run out
    pub fn is_near_end(&self, margin: u64) -> bool {
        self.frames_remaining != 0 && self.frames_remaining < margin
    }

    /// Date string used to name recordings, e.g. `2024-08-12T21:03:44.120345`
    pub fn date_string(&self) -> String {
        self.timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }

    /// Convert to an 8-bit grey image for previews, stretched to the sensor depth
    pub fn to_gray8(&self) -> image::GrayImage {
        let (height, width) = self.dim();
        let shift = self.bit_depth.bits().saturating_sub(8);
        image::GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let value = self.pixels[(y as usize, x as usize)] >> shift;
            image::Luma([value.min(u8::MAX as u16) as u8])
        })
    }
}
