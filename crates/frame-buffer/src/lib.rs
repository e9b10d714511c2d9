//! Frame Ring Buffers
//!
//! Bounded, overwrite-oldest buffers shared between the acquisition thread
//! and its consumers (detection, event recorder, stack writer), plus the
//! stacking accumulator that feeds the stacked-frames ring.

mod buffer;
pub mod stack;

pub use buffer::{RingBuffer, WaitOutcome, DEFAULT_CAPACITY};
pub use stack::{StackAccumulator, StackConfig, StackedFrames};

use camera_capture::Frame;
use thiserror::Error;

/// Anything stored in a ring carries a monotonically increasing sequence number
pub trait Sequenced {
    fn sequence(&self) -> u64;
}

impl Sequenced for Frame {
    fn sequence(&self) -> u64 {
        self.number
    }
}

/// Ring of recent frames written by the acquisition thread
pub type FrameRingBuffer = RingBuffer<Frame>;

/// Ring of completed stacks
pub type StackRingBuffer = RingBuffer<StackedFrames>;

/// Buffer errors
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Invalid ring capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Invalid stack configuration: {0}")]
    InvalidStackConfig(String),
}
