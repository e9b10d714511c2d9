//! Detection thread

use crate::PipelineError;
use acquisition::StopFlag;
use camera_capture::Frame;
use detection::{run_detection_cycle, DetectionConfig, DetectionContext};
use event_recorder::RecorderQueue;
use frame_buffer::{FrameRingBuffer, WaitOutcome};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Counters reported when detection exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionSummary {
    pub cycles: u64,
    pub gaps: u64,
    pub confirmed: u64,
    pub skipped: u64,
}

/// Handle on a running detection thread
pub struct DetectionHandle {
    join: JoinHandle<Result<DetectionSummary, PipelineError>>,
}

impl DetectionHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> Result<DetectionSummary, PipelineError> {
        self.join.join().map_err(|_| PipelineError::Panicked("detection"))?
    }
}

/// Consumes every frame of the ring in order and runs one detection cycle
/// per consecutive pair
pub struct DetectionWorker {
    config: DetectionConfig,
    frames: Arc<FrameRingBuffer>,
    queue: Option<Arc<RecorderQueue>>,
    stop: StopFlag,
}

impl DetectionWorker {
    /// Confirmed events go to `queue`; without one they are only logged
    pub fn new(
        config: DetectionConfig,
        frames: Arc<FrameRingBuffer>,
        queue: Option<Arc<RecorderQueue>>,
        stop: StopFlag,
    ) -> Self {
        Self {
            config,
            frames,
            queue,
            stop,
        }
    }

    pub fn spawn(self) -> Result<DetectionHandle, PipelineError> {
        let join = std::thread::Builder::new()
            .name("detection".into())
            .spawn(move || self.run())?;
        Ok(DetectionHandle { join })
    }

    /// Run until the ring is closed and drained, or a stop is requested
    pub fn run(self) -> Result<DetectionSummary, PipelineError> {
        let result = self.consume();
        if let Err(e) = &result {
            error!("Detection aborted: {}", e);
        }
        result
    }

    fn consume(&self) -> Result<DetectionSummary, PipelineError> {
        let mut summary = DetectionSummary::default();
        let mut ctx: Option<DetectionContext> = None;
        let mut previous: Option<Arc<Frame>> = None;
        let mut cursor: Option<u64> = None;

        loop {
            match self.frames.wait_newer_than(cursor, POLL_INTERVAL) {
                WaitOutcome::Items(batch) => {
                    for frame in batch {
                        if let Some(last) = cursor {
                            if frame.number > last + 1 {
                                warn!("Frames {}..{} lost before detection", last + 1, frame.number);
                            }
                        }
                        cursor = Some(frame.number);
                        self.process(&mut ctx, &mut summary, &frame, previous.as_deref())?;
                        previous = Some(frame);
                    }
                }
                WaitOutcome::Timeout => {}
                WaitOutcome::Closed => break,
            }
            if self.stop.is_requested() {
                break;
            }
        }

        if let Some(ctx) = &ctx {
            summary.gaps = ctx.stats().gaps;
        }
        info!(
            "Detection stopped: {} cycles, {} confirmed, {} gaps",
            summary.cycles, summary.confirmed, summary.gaps
        );
        Ok(summary)
    }

    fn process(
        &self,
        ctx: &mut Option<DetectionContext>,
        summary: &mut DetectionSummary,
        frame: &Frame,
        previous: Option<&Frame>,
    ) -> Result<(), PipelineError> {
        if ctx.is_none() {
            *ctx = Some(DetectionContext::new(self.config.clone(), frame.dim())?);
        }
        let (Some(context), Some(previous)) = (ctx.as_mut(), previous) else {
            return Ok(());
        };

        match run_detection_cycle(context, frame, previous) {
            Ok(Some(confirmed)) => {
                summary.confirmed += 1;
                info!(
                    "Meteor confirmed on frame {}: record frames {}..={}",
                    frame.number, confirmed.window.first, confirmed.window.last
                );
                if let Some(queue) = &self.queue {
                    if !queue.push(confirmed) {
                        warn!("Recorder queue closed, event dropped");
                    }
                }
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!("Skipping frame {}: {}", frame.number, e);
                summary.skipped += 1;
                // Rebuilt for the new geometry on the next frame
                *ctx = None;
                return Ok(());
            }
        }
        summary.cycles += 1;
        Ok(())
    }
}
