//! Coordinate spaces and regions of interest

use serde::{Deserialize, Serialize};

/// Resolution at which a detection cycle runs.
///
/// Maps, masks and local events are expressed in processing coordinates;
/// positions handed to tracks are converted back to full resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scale {
    Full,
    Half,
}

impl Scale {
    pub fn from_downsample(downsample: bool) -> Self {
        if downsample {
            Scale::Half
        } else {
            Scale::Full
        }
    }

    /// Full-resolution pixels per processing pixel, along one axis
    pub fn factor(self) -> usize {
        match self {
            Scale::Full => 1,
            Scale::Half => 2,
        }
    }

    /// Processing-scale dimensions of a full-resolution `(rows, cols)` extent
    pub fn reduce_dim(self, (rows, cols): (usize, usize)) -> (usize, usize) {
        (rows / self.factor(), cols / self.factor())
    }

    /// Processing-scale length of a full-resolution length (at least 1)
    pub fn reduce_len(self, len: usize) -> usize {
        (len / self.factor()).max(1)
    }

    /// Full-resolution coordinate of a processing-scale coordinate
    pub fn to_full(self, v: f64) -> f64 {
        match self {
            Scale::Full => v,
            Scale::Half => v * 2.0 + 0.5,
        }
    }

    /// Full-resolution pixel sampled for a processing-scale pixel
    pub fn to_full_index(self, v: usize) -> usize {
        v * self.factor()
    }
}

/// A point in full-resolution pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn sub(&self, other: &Position) -> (f64, f64) {
        (self.x - other.x, self.y - other.y)
    }
}

/// Square region of interest in processing coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    /// Left column
    pub x: usize,
    /// Top row
    pub y: usize,
    /// Side length
    pub size: usize,
}

impl Roi {
    /// ROI of side `size` centered on `(x, y)`, or `None` when it would leave
    /// an extent of `(rows, cols)`.
    pub fn centered(x: usize, y: usize, size: usize, (rows, cols): (usize, usize)) -> Option<Self> {
        let half = size / 2;
        let left = x.checked_sub(half)?;
        let top = y.checked_sub(half)?;
        if left + size > cols || top + size > rows {
            return None;
        }
        Some(Self {
            x: left,
            y: top,
            size,
        })
    }

    pub fn rows(&self) -> std::ops::Range<usize> {
        self.y..self.y + self.size
    }

    pub fn cols(&self) -> std::ops::Range<usize> {
        self.x..self.x + self.size
    }

    /// ndarray slice covering this ROI
    pub fn slice(&self) -> ndarray::SliceInfo<[ndarray::SliceInfoElem; 2], ndarray::Ix2, ndarray::Ix2> {
        ndarray::s![self.y..self.y + self.size, self.x..self.x + self.size]
    }
}
