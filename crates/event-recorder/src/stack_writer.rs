//! Stack writer: persists every completed stack as a 16-bit PNG with a JSON sidecar

use crate::RecorderError;
use camera_capture::BitDepth;
use chrono::{DateTime, Utc};
use frame_buffer::{StackRingBuffer, StackedFrames, WaitOutcome};
use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StackMetadata {
    sequence: u64,
    first_date: DateTime<Utc>,
    last_date: DateTime<Utc>,
    first_frame: u64,
    last_frame: u64,
    count: u32,
    gain: f64,
    exposure_us: f64,
    bit_depth: BitDepth,
}

/// Write `stack` into `dir`; returns the PNG path.
///
/// The mean image is scaled from the sensor range to the full 16-bit range.
pub fn write_stack(stack: &StackedFrames, dir: &Path) -> Result<PathBuf, RecorderError> {
    fs::create_dir_all(dir)?;
    let stem = format!(
        "stack_{}_{:06}",
        stack.first_date.format("%Y%m%dT%H%M%S"),
        stack.sequence
    );

    let mean = stack.mean();
    let scale = u16::MAX as f32 / stack.bit_depth.max_value() as f32;
    let (height, width) = mean.dim();
    let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let v = mean[(y as usize, x as usize)] * scale;
        Luma([v.round().clamp(0.0, u16::MAX as f32) as u16])
    });
    let png = dir.join(format!("{}.png", stem));
    img.save(&png)?;

    let metadata = StackMetadata {
        sequence: stack.sequence,
        first_date: stack.first_date,
        last_date: stack.last_date,
        first_frame: stack.first_frame,
        last_frame: stack.last_frame,
        count: stack.count,
        gain: stack.gain,
        exposure_us: stack.exposure_us,
        bit_depth: stack.bit_depth,
    };
    fs::write(dir.join(format!("{}.json", stem)), serde_json::to_vec_pretty(&metadata)?)?;
    Ok(png)
}

/// Handle on a running stack writer
pub struct StackWriterHandle {
    join: JoinHandle<u64>,
}

impl StackWriterHandle {
    /// Wait for the writer to exit; returns the number of stacks written
    pub fn join(self) -> Result<u64, RecorderError> {
        self.join
            .join()
            .map_err(|_| RecorderError::Unavailable("stack writer panicked".into()))
    }
}

/// Consumes the stacked-frames ring until it is closed
pub struct StackWriter {
    stacks: Arc<StackRingBuffer>,
    dir: PathBuf,
}

impl StackWriter {
    pub fn new(stacks: Arc<StackRingBuffer>, dir: PathBuf) -> Self {
        Self { stacks, dir }
    }

    pub fn spawn(self) -> Result<StackWriterHandle, RecorderError> {
        let join = std::thread::Builder::new()
            .name("stack-writer".into())
            .spawn(move || self.run())
            .map_err(|e| RecorderError::Unavailable(format!("spawn failed: {}", e)))?;
        Ok(StackWriterHandle { join })
    }

    pub fn run(self) -> u64 {
        let mut cursor = None;
        let mut written = 0;
        loop {
            match self.stacks.wait_newer_than(cursor, Duration::from_millis(500)) {
                WaitOutcome::Items(stacks) => {
                    for stack in stacks {
                        cursor = Some(stack.sequence);
                        match write_stack(&stack, &self.dir) {
                            Ok(path) => {
                                written += 1;
                                info!("Stack {} written to {}", stack.sequence, path.display());
                                metrics::counter!("recorder_stacks_written_total").increment(1);
                            }
                            Err(e) => {
                                error!("Writing stack {} failed: {}", stack.sequence, e);
                                metrics::counter!("recorder_stacks_failed_total").increment(1);
                            }
                        }
                    }
                }
                WaitOutcome::Timeout => continue,
                WaitOutcome::Closed => break,
            }
        }
        written
    }
}
