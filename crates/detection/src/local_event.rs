//! Local events: spatially grouped changed pixels of one cycle

use crate::geometry::{Position, Roi, Scale};
use crate::palette::ColorTag;
use camera_capture::Frame;
use ndarray::Array2;

/// One changed pixel, processing coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelEvent {
    pub x: usize,
    pub y: usize,
    /// Full-resolution sample under the pixel
    pub intensity: u16,
}

/// Changed pixels grouped by overlapping ROIs within one cycle
#[derive(Debug, Clone)]
pub struct LocalEvent {
    pub color: ColorTag,
    /// Frame this event was detected on
    pub frame_number: u64,
    pub scale: Scale,
    dim: (usize, usize),
    rois: Vec<Roi>,
    pixels: Vec<PixelEvent>,
}

impl LocalEvent {
    /// Empty event on a processing-scale extent of `dim`
    pub fn new(color: ColorTag, frame_number: u64, dim: (usize, usize), scale: Scale) -> Self {
        Self {
            color,
            frame_number,
            scale,
            dim,
            rois: Vec::new(),
            pixels: Vec::new(),
        }
    }

    /// Add `roi`, collecting the on-pixels of `map` it covers
    pub fn add_roi(&mut self, roi: Roi, map: &Array2<bool>, frame: &Frame) {
        for y in roi.rows() {
            for x in roi.cols() {
                if !map[(y, x)] {
                    continue;
                }
                let intensity = frame
                    .get_pixel(self.scale.to_full_index(x), self.scale.to_full_index(y))
                    .unwrap_or(0);
                self.pixels.push(PixelEvent { x, y, intensity });
            }
        }
        self.rois.push(roi);
    }

    /// Take over the ROIs and pixels of another event
    pub fn absorb(&mut self, other: LocalEvent) {
        self.rois.extend(other.rois);
        self.pixels.extend(other.pixels);
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    pub fn pixels(&self) -> &[PixelEvent] {
        &self.pixels
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Union of the event's ROIs
    pub fn mask(&self) -> Array2<bool> {
        let mut mask = Array2::from_elem(self.dim, false);
        for roi in &self.rois {
            mask.slice_mut(roi.slice()).fill(true);
        }
        mask
    }

    /// Whether any ROI overlaps an active cell of `mask`
    pub fn intersects(&self, mask: &Array2<bool>) -> bool {
        self.rois
            .iter()
            .any(|roi| mask.slice(roi.slice()).iter().any(|on| *on))
    }

    /// Mean pixel position, processing coordinates
    pub fn center(&self) -> (f64, f64) {
        if self.pixels.is_empty() {
            return self
                .rois
                .first()
                .map(|roi| {
                    (
                        roi.x as f64 + (roi.size as f64 - 1.0) / 2.0,
                        roi.y as f64 + (roi.size as f64 - 1.0) / 2.0,
                    )
                })
                .unwrap_or((0.0, 0.0));
        }
        let n = self.pixels.len() as f64;
        let (sx, sy) = self
            .pixels
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
        (sx / n, sy / n)
    }

    /// Mean pixel position, full-resolution coordinates
    pub fn position(&self) -> Position {
        let (x, y) = self.center();
        Position::new(self.scale.to_full(x), self.scale.to_full(y))
    }

    pub fn max_intensity(&self) -> u16 {
        self.pixels.iter().map(|p| p.intensity).max().unwrap_or(0)
    }
}
