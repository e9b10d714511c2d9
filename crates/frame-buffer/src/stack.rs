//! Frame stacking
//!
//! Sums consecutive frames into one float image for slow-cadence
//! astrometry and photometry consumers. Runs duty-cycled: skip
//! `frame_to_wait` frames, then sum `frame_to_sum` frames, then start over.

use crate::{BufferError, Sequenced};
use camera_capture::{BitDepth, Frame};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Stacking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Whether the acquisition thread stacks at all
    pub enabled: bool,
    /// Frames skipped before each stacking run
    pub frame_to_wait: u32,
    /// Frames summed into one stack
    pub frame_to_sum: u32,
    /// Capacity of the stacked-frames ring
    pub buffer_capacity: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frame_to_wait: 0,
            frame_to_sum: 25,
            buffer_capacity: 4,
        }
    }
}

impl StackConfig {
    /// Reject configurations that can never produce a stack
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.frame_to_sum == 0 {
            return Err(BufferError::InvalidStackConfig("frame_to_sum must be > 0".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(BufferError::InvalidStackConfig("buffer_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// One completed stack
#[derive(Debug, Clone)]
pub struct StackedFrames {
    /// Per-pixel sum of the stacked frames
    pub sum: Array2<f32>,
    /// Date of the first summed frame
    pub first_date: DateTime<Utc>,
    /// Date of the last summed frame
    pub last_date: DateTime<Utc>,
    /// Gain of the first summed frame
    pub gain: f64,
    /// Exposure of the first summed frame (microseconds)
    pub exposure_us: f64,
    /// Number of frames summed
    pub count: u32,
    /// Depth of the summed frames
    pub bit_depth: BitDepth,
    /// Frame number of the first summed frame
    pub first_frame: u64,
    /// Frame number of the last summed frame
    pub last_frame: u64,
    /// Stack sequence number
    pub sequence: u64,
}

impl StackedFrames {
    /// Mean image (sum divided by count)
    pub fn mean(&self) -> Array2<f32> {
        let count = self.count.max(1) as f32;
        self.sum.mapv(|v| v / count)
    }
}

impl Sequenced for StackedFrames {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

struct RunningStack {
    sum: Array2<f32>,
    first_date: DateTime<Utc>,
    last_date: DateTime<Utc>,
    gain: f64,
    exposure_us: f64,
    count: u32,
    bit_depth: BitDepth,
    first_frame: u64,
    last_frame: u64,
}

enum StackPhase {
    Waiting { remaining: u32 },
    Stacking(Option<RunningStack>),
}

/// Duty-cycled frame accumulator
pub struct StackAccumulator {
    config: StackConfig,
    phase: StackPhase,
    next_sequence: u64,
}

impl StackAccumulator {
    /// Create an accumulator; starts in the wait phase
    pub fn new(config: StackConfig) -> Result<Self, BufferError> {
        config.validate()?;
        let phase = Self::initial_phase(&config);
        Ok(Self {
            config,
            phase,
            next_sequence: 0,
        })
    }

    fn initial_phase(config: &StackConfig) -> StackPhase {
        if config.frame_to_wait > 0 {
            StackPhase::Waiting {
                remaining: config.frame_to_wait,
            }
        } else {
            StackPhase::Stacking(None)
        }
    }

    /// Whether the accumulator is currently summing
    pub fn is_stacking(&self) -> bool {
        matches!(self.phase, StackPhase::Stacking(_))
    }

    /// Frames summed so far in the running stack
    pub fn pending(&self) -> u32 {
        match &self.phase {
            StackPhase::Stacking(Some(run)) => run.count,
            _ => 0,
        }
    }

    /// Feed one frame; returns a stack when `frame_to_sum` frames were summed
    pub fn push(&mut self, frame: &Frame) -> Option<StackedFrames> {
        match &mut self.phase {
            StackPhase::Waiting { remaining } => {
                *remaining -= 1;
                if *remaining == 0 {
                    debug!("Stack wait phase over at frame {}", frame.number);
                    self.phase = StackPhase::Stacking(None);
                }
                None
            }
            StackPhase::Stacking(running) => {
                let restart = running
                    .as_ref()
                    .map_or(true, |run| run.sum.dim() != frame.dim());
                if restart {
                    if running.is_some() {
                        warn!(
                            "Frame {} geometry {:?} differs from running stack, restarting",
                            frame.number,
                            frame.dim()
                        );
                    }
                    *running = Some(RunningStack {
                        sum: Array2::zeros(frame.dim()),
                        first_date: frame.timestamp,
                        last_date: frame.timestamp,
                        gain: frame.gain,
                        exposure_us: frame.exposure_us,
                        count: 0,
                        bit_depth: frame.bit_depth,
                        first_frame: frame.number,
                        last_frame: frame.number,
                    });
                }

                let run = running.as_mut()?;
                run.sum.zip_mut_with(&frame.pixels, |acc, &px| *acc += px as f32);
                run.count += 1;
                run.last_date = frame.timestamp;
                run.last_frame = frame.number;

                if run.count < self.config.frame_to_sum {
                    return None;
                }

                let done = running.take()?;
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.phase = Self::initial_phase(&self.config);

                debug!(
                    "Stack {} complete: frames {}..={}",
                    sequence, done.first_frame, done.last_frame
                );

                Some(StackedFrames {
                    sum: done.sum,
                    first_date: done.first_date,
                    last_date: done.last_date,
                    gain: done.gain,
                    exposure_us: done.exposure_us,
                    count: done.count,
                    bit_depth: done.bit_depth,
                    first_frame: done.first_frame,
                    last_frame: done.last_frame,
                    sequence,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(number: u64, level: u16, gain: f64) -> Frame {
        let mut f = Frame::new(Array2::from_elem((2, 3), level), BitDepth::Mono8);
        f.number = number;
        f.gain = gain;
        f.exposure_us = 1000.0 * (number + 1) as f64;
        f
    }

    #[test]
    fn test_sums_frames_without_wait() {
        let config = StackConfig {
            enabled: true,
            frame_to_wait: 0,
            frame_to_sum: 3,
            buffer_capacity: 2,
        };
        let mut acc = StackAccumulator::new(config).unwrap();

        assert!(acc.push(&frame(0, 10, 2.0)).is_none());
        assert!(acc.push(&frame(1, 20, 3.0)).is_none());
        let stack = acc.push(&frame(2, 30, 4.0)).unwrap();

        assert_eq!(stack.count, 3);
        assert_eq!(stack.sum[(1, 2)], 60.0);
        assert_eq!(stack.mean()[(0, 0)], 20.0);
        // Metadata comes from the first summed frame
        assert_eq!(stack.gain, 2.0);
        assert_eq!(stack.exposure_us, 1000.0);
        assert_eq!((stack.first_frame, stack.last_frame), (0, 2));
        assert_eq!(stack.sequence, 0);
    }

    #[test]
    fn test_duty_cycle_waits_before_each_run() {
        let config = StackConfig {
            enabled: true,
            frame_to_wait: 2,
            frame_to_sum: 2,
            buffer_capacity: 2,
        };
        let mut acc = StackAccumulator::new(config).unwrap();

        let emitted: Vec<(u64, u64)> = (0..10)
            .filter_map(|n| acc.push(&frame(n, 1, 1.0)))
            .map(|s| (s.first_frame, s.last_frame))
            .collect();

        // wait 0,1 / sum 2,3 / wait 4,5 / sum 6,7 / wait 8,9
        assert_eq!(emitted, vec![(2, 3), (6, 7)]);
        assert!(!acc.is_stacking());
    }

    #[test]
    fn test_geometry_change_restarts_stack() {
        let config = StackConfig {
            enabled: true,
            frame_to_wait: 0,
            frame_to_sum: 2,
            buffer_capacity: 2,
        };
        let mut acc = StackAccumulator::new(config).unwrap();
        acc.push(&frame(0, 5, 1.0));
        assert_eq!(acc.pending(), 1);

        let mut odd = Frame::new(Array2::from_elem((4, 4), 7), BitDepth::Mono8);
        odd.number = 1;
        assert!(acc.push(&odd).is_none());
        assert_eq!(acc.pending(), 1);
    }

    #[test]
    fn test_invalid_config() {
        let config = StackConfig {
            frame_to_sum: 0,
            ..Default::default()
        };
        assert!(StackAccumulator::new(config).is_err());
    }
}
