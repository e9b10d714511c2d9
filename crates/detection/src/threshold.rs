//! Region thresholding
//!
//! Turns two consecutive frames into a binary map of changed pixels. A pixel
//! only survives if it changed in this cycle and in the previous one, which
//! suppresses single-frame noise such as hot pixels and cosmic rays.

use crate::geometry::Scale;
use crate::image_ops;
use crate::DetectionError;
use camera_capture::Frame;
use ndarray::Array2;
use tracing::trace;

/// Binary change map at processing scale
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdMap {
    pub pixels: Array2<bool>,
    pub scale: Scale,
}

impl ThresholdMap {
    pub fn empty(dim: (usize, usize), scale: Scale) -> Self {
        Self {
            pixels: Array2::from_elem(dim, false),
            scale,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    pub fn count_on(&self) -> usize {
        self.pixels.iter().filter(|on| **on).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.pixels.iter().any(|on| *on)
    }
}

/// Computes confirmed change maps from consecutive frame pairs
pub struct RegionThresholder {
    mask: Array2<bool>,
    scaled_mask: Array2<bool>,
    local_mask: Array2<bool>,
    scale: Scale,
    previous: Option<Array2<bool>>,
    last_threshold: u32,
}

impl RegionThresholder {
    /// Create a thresholder for frames matching `mask` (full resolution)
    pub fn new(mask: Array2<bool>, downsample: bool) -> Self {
        Self::with_local_mask(mask, image_ops::default_local_mask(), downsample)
    }

    /// Create a thresholder with a custom 3x3 isolation neighbourhood
    pub fn with_local_mask(mask: Array2<bool>, local_mask: Array2<bool>, downsample: bool) -> Self {
        let scale = Scale::from_downsample(downsample);
        let scaled_mask = match scale {
            Scale::Full => mask.clone(),
            Scale::Half => image_ops::downsample_mask(&mask),
        };
        Self {
            mask,
            scaled_mask,
            local_mask,
            scale,
            previous: None,
            last_threshold: 0,
        }
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// Full-resolution static mask
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    /// Processing-scale dimensions
    pub fn processing_dim(&self) -> (usize, usize) {
        self.scaled_mask.dim()
    }

    /// Threshold applied in the last cycle
    pub fn last_threshold(&self) -> u32 {
        self.last_threshold
    }

    /// Forget the previous cycle's map; the next cycle returns an empty map
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Confirmed change map between `previous` and `current`.
    ///
    /// On the first cycle after construction or [`reset`](Self::reset) the
    /// result is empty: confirmation needs two raw maps.
    pub fn apply(&mut self, current: &Frame, previous: &Frame) -> Result<ThresholdMap, DetectionError> {
        let expected = self.mask.dim();
        for frame in [current, previous] {
            if frame.dim() != expected {
                return Err(DetectionError::MaskSizeMismatch {
                    mask: expected,
                    frame: frame.dim(),
                });
            }
        }

        let raw = self.raw_map(current, previous);
        let confirmed = match self.previous.as_ref() {
            Some(prev) => image_ops::and(&raw, prev),
            None => Array2::from_elem(raw.dim(), false),
        };
        self.previous = Some(raw);

        Ok(ThresholdMap {
            pixels: confirmed,
            scale: self.scale,
        })
    }

    fn raw_map(&mut self, current: &Frame, previous: &Frame) -> Array2<bool> {
        let mut cur = image_ops::apply_mask(&current.pixels, &self.mask);
        let mut prev = image_ops::apply_mask(&previous.pixels, &self.mask);
        if self.scale == Scale::Half {
            cur = image_ops::downsample(&cur);
            prev = image_ops::downsample(&prev);
        }

        let diff = image_ops::absdiff(&cur, &prev);
        let diff = image_ops::to_u8_range(&diff, current.bit_depth.is_wide());

        let (_, std) = image_ops::masked_mean_std(&diff, &self.scaled_mask);
        let threshold = 5 * (std.round() as u32 + 1);
        self.last_threshold = threshold;
        trace!(
            "Frame {}: diff std {:.2}, threshold {}",
            current.number,
            std,
            threshold
        );

        let map = image_ops::threshold(&diff, threshold);
        image_ops::remove_isolated(&map, &self.local_mask)
    }
}
