//! Recorder boundary and directory implementation

use crate::{RecorderConfig, RecorderError};
use camera_capture::{BitDepth, Frame};
use chrono::{DateTime, Utc};
use detection::{ConfirmedEvent, Position};
use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// What a successful recording produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingOutcome {
    pub id: Uuid,
    pub directory: PathBuf,
    pub frames_written: usize,
    pub previews_written: usize,
    /// Frames of the window no longer (or never) in the ring
    pub missing_frames: u64,
}

/// Persists one confirmed event with the frames of its window.
///
/// Runs on the recorder thread; errors are logged by the caller and never
/// retried.
pub trait EventRecorder: Send {
    fn record(&mut self, event: &ConfirmedEvent, frames: &[Arc<Frame>]) -> Result<RecordingOutcome, RecorderError>;
}

/// Per-frame metadata in `event.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub exposure_us: f64,
    pub gain: f64,
}

/// Content of `event.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub id: Uuid,
    pub track_id: u64,
    pub created: DateTime<Utc>,
    pub first_frame: u64,
    pub last_frame: u64,
    pub window_first: u64,
    pub window_last: u64,
    pub local_events: usize,
    pub linear: bool,
    pub positions: Vec<Position>,
    pub max_intensity: u16,
    pub bit_depth: Option<BitDepth>,
    pub frames: Vec<FrameMetadata>,
}

impl EventMetadata {
    pub fn new(id: Uuid, confirmed: &ConfirmedEvent, frames: &[Arc<Frame>]) -> Self {
        let ge = &confirmed.event;
        Self {
            id,
            track_id: ge.id,
            created: ge.created,
            first_frame: ge.first_frame(),
            last_frame: ge.last_frame(),
            window_first: confirmed.window.first,
            window_last: confirmed.window.last,
            local_events: ge.le_count(),
            linear: ge.is_linear(),
            positions: ge.positions().to_vec(),
            max_intensity: ge.le_list().iter().map(|le| le.max_intensity()).max().unwrap_or(0),
            bit_depth: frames.first().map(|f| f.bit_depth),
            frames: frames
                .iter()
                .map(|f| FrameMetadata {
                    number: f.number,
                    timestamp: f.timestamp,
                    exposure_us: f.exposure_us,
                    gain: f.gain,
                })
                .collect(),
        }
    }
}

/// Writes each event into its own directory:
/// `frame_<number>.png` (8 or 16 bit), `preview_<n>.png` and `event.json`
pub struct DirectoryRecorder {
    root: PathBuf,
    save_frames: bool,
    save_previews: bool,
}

impl DirectoryRecorder {
    pub fn new(config: &RecorderConfig) -> Self {
        Self {
            root: config.output_dir.clone(),
            save_frames: config.save_frames,
            save_previews: config.save_previews,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn event_dir(&self, confirmed: &ConfirmedEvent, id: &Uuid) -> PathBuf {
        let date = confirmed.event.created.format("%Y%m%dT%H%M%S");
        let short = id.simple().to_string();
        self.root.join(format!("{}_{}", date, &short[..8]))
    }
}

/// Save a frame as a grey PNG at its native depth
pub fn save_frame(frame: &Frame, path: &Path) -> Result<(), RecorderError> {
    let (height, width) = frame.dim();
    match frame.bit_depth {
        BitDepth::Mono8 => frame.to_gray8().save(path)?,
        BitDepth::Mono12 | BitDepth::Mono16 => {
            let img: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
                    Luma([frame.pixels[(y as usize, x as usize)]])
                });
            img.save(path)?;
        }
    }
    Ok(())
}

impl EventRecorder for DirectoryRecorder {
    fn record(&mut self, confirmed: &ConfirmedEvent, frames: &[Arc<Frame>]) -> Result<RecordingOutcome, RecorderError> {
        let id = Uuid::new_v4();
        let dir = self.event_dir(confirmed, &id);
        fs::create_dir_all(&dir)?;

        let mut frames_written = 0;
        if self.save_frames {
            for frame in frames {
                save_frame(frame, &dir.join(format!("frame_{:08}.png", frame.number)))?;
                frames_written += 1;
            }
        }

        let mut previews_written = 0;
        if self.save_previews {
            for (i, preview) in confirmed.event.previews().enumerate() {
                preview.save(dir.join(format!("preview_{:02}.png", i)))?;
                previews_written += 1;
            }
        }

        let metadata = EventMetadata::new(id, confirmed, frames);
        fs::write(dir.join("event.json"), serde_json::to_vec_pretty(&metadata)?)?;

        let missing_frames = confirmed.window.len().saturating_sub(frames.len() as u64);
        if missing_frames > 0 {
            debug!(
                "Event {}: {} frames of window {}..={} unavailable",
                id, missing_frames, confirmed.window.first, confirmed.window.last
            );
        }
        info!("Recorded event {} into {}", id, dir.display());

        Ok(RecordingOutcome {
            id,
            directory: dir,
            frames_written,
            previews_written,
            missing_frames,
        })
    }
}
