//! Frame directory source
//!
//! Reads an ordered set of still frames (file-name order) and plays them
//! back as a finite stream.

use crate::{BitDepth, CameraError, Frame, FrameSource};
use chrono::{Duration, Utc};
use image::DynamicImage;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SUPPORTED_EXTENSIONS: &[&str] = &["png", "bmp", "tif", "tiff"];

/// Plays back still frames stored in a directory
pub struct FrameDirectorySource {
    directory: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    fps: f64,
    started: chrono::DateTime<Utc>,
}

impl FrameDirectorySource {
    /// Scan `directory` for supported still frames
    pub fn open(directory: &Path, fps: f64) -> Result<Self, CameraError> {
        if !directory.is_dir() {
            return Err(CameraError::Open(format!(
                "{} is not a directory",
                directory.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(directory)? {
            let path = entry?.path();
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if supported {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(CameraError::Open(format!(
                "no frames found in {}",
                directory.display()
            )));
        }

        info!("Frame directory {} holds {} frames", directory.display(), files.len());

        Ok(Self {
            directory: directory.to_path_buf(),
            files,
            next: 0,
            fps,
            started: Utc::now(),
        })
    }

    /// Total number of frames in the directory
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the directory held no frame
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn decode(path: &Path) -> Result<(Array2<u16>, BitDepth), CameraError> {
        let img = image::open(path).map_err(|e| CameraError::Format(format!("{}: {}", path.display(), e)))?;
        match img {
            DynamicImage::ImageLuma16(buf) => {
                let (w, h) = buf.dimensions();
                let pixels = Array2::from_shape_vec((h as usize, w as usize), buf.into_raw())
                    .map_err(|e| CameraError::Format(e.to_string()))?;
                Ok((pixels, BitDepth::Mono16))
            }
            other => {
                let buf = other.to_luma8();
                let (w, h) = buf.dimensions();
                let raw = buf.into_raw().into_iter().map(u16::from).collect();
                let pixels = Array2::from_shape_vec((h as usize, w as usize), raw)
                    .map_err(|e| CameraError::Format(e.to_string()))?;
                Ok((pixels, BitDepth::Mono8))
            }
        }
    }
}

impl FrameSource for FrameDirectorySource {
    fn grab_image(&mut self) -> Result<Frame, CameraError> {
        let Some(path) = self.files.get(self.next).cloned() else {
            return Err(CameraError::EndOfStream);
        };
        let index = self.next;
        self.next += 1;

        let (pixels, depth) = Self::decode(&path).map_err(|e| {
            warn!("Skipping unreadable frame {}: {}", path.display(), e);
            e
        })?;

        let mut frame = Frame::new(pixels, depth);
        let offset_us = if self.fps > 0.0 {
            (index as f64 * 1_000_000.0 / self.fps) as i64
        } else {
            0
        };
        frame.timestamp = self.started + Duration::microseconds(offset_us);
        frame.fps = self.fps;
        frame.frames_remaining = self.frames_remaining();
        Ok(frame)
    }

    fn frames_remaining(&self) -> u64 {
        (self.files.len() - self.next.min(self.files.len())) as u64
    }

    fn describe(&self) -> String {
        format!("directory {} ({} frames)", self.directory.display(), self.files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    #[test]
    fn test_reads_frames_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, level) in [("b.png", 20u8), ("a.png", 10u8), ("c.png", 30u8)] {
            GrayImage::from_pixel(4, 3, Luma([level]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = FrameDirectorySource::open(dir.path(), 10.0).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.frames_remaining(), 3);

        let levels: Vec<u16> = (0..3)
            .map(|_| source.grab_image().unwrap().pixels[(0, 0)])
            .collect();
        assert_eq!(levels, vec![10, 20, 30]);
        assert!(matches!(source.grab_image(), Err(CameraError::EndOfStream)));
    }

    #[test]
    fn test_corrupt_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(2, 2, Luma([10u8]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("b.png"), b"not a png").unwrap();
        GrayImage::from_pixel(2, 2, Luma([30u8]))
            .save(dir.path().join("c.png"))
            .unwrap();

        let mut source = FrameDirectorySource::open(dir.path(), 25.0).unwrap();
        assert_eq!(source.grab_image().unwrap().pixels[(0, 0)], 10);
        let err = source.grab_image().unwrap_err();
        assert!(matches!(err, CameraError::Format(_)));
        assert!(err.is_transient());
        assert_eq!(source.grab_image().unwrap().pixels[(0, 0)], 30);
    }

    #[test]
    fn test_keeps_sixteen_bit_depth() {
        let dir = tempfile::tempdir().unwrap();
        let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(2, 2, Luma([3000u16]));
        img.save(dir.path().join("frame.png")).unwrap();

        let mut source = FrameDirectorySource::open(dir.path(), 25.0).unwrap();
        let frame = source.grab_image().unwrap();
        assert_eq!(frame.bit_depth, BitDepth::Mono16);
        assert_eq!(frame.pixels[(1, 1)], 3000);
        assert_eq!(frame.frames_remaining, 0);
    }

    #[test]
    fn test_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FrameDirectorySource::open(dir.path(), 25.0).is_err());
    }
}
