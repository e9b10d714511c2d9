//! Acquisition Thread Implementation

use camera_capture::{CameraError, FrameSource};
use frame_buffer::{FrameRingBuffer, StackAccumulator, StackConfig, StackRingBuffer};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::AcquisitionError;

/// Configuration for the acquisition loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Capacity of the frame ring
    pub ring_capacity: usize,
    /// Give up after this many failed grabs in a row (0 = never)
    pub max_consecutive_failures: u32,
    /// Heartbeat age after which the pipeline reports a stalled grab (ms)
    pub stall_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 250,
            max_consecutive_failures: 50,
            stall_timeout_ms: 5000,
        }
    }
}

/// Cooperative stop request shared with the acquisition thread.
///
/// Polled once per loop iteration, after the grab; a grab blocked inside a
/// driver is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the loop to stop at the end of its current iteration
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Time of the last completed grab, used by a watchdog to spot a thread
/// stuck inside a blocking driver call.
#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    last_beat_ms: AtomicU64,
    last_frame: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_beat_ms: AtomicU64::new(0),
            last_frame: AtomicU64::new(0),
        }
    }

    /// Record a completed grab attempt
    pub fn beat(&self, frame_number: u64) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_beat_ms.store(elapsed, Ordering::Release);
        self.last_frame.store(frame_number, Ordering::Release);
    }

    /// Time since the last completed grab attempt
    pub fn silence(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_beat_ms.load(Ordering::Acquire)))
    }

    /// Frame number reported by the last beat
    pub fn last_frame(&self) -> u64 {
        self.last_frame.load(Ordering::Acquire)
    }

    /// Whether no grab completed within `timeout`
    pub fn is_stalled(&self, timeout: Duration) -> bool {
        self.silence() > timeout
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub frames_grabbed: u64,
    pub grab_failures: u64,
    pub frames_evicted: u64,
    pub stacks_emitted: u64,
}

/// Handle on a running acquisition thread
pub struct AcquisitionHandle {
    stop: StopFlag,
    heartbeat: Arc<Heartbeat>,
    join: JoinHandle<Result<AcquisitionSummary, AcquisitionError>>,
}

impl AcquisitionHandle {
    /// Ask the thread to stop after its current grab
    pub fn stop(&self) {
        info!("Stopping acquisition");
        self.stop.request();
    }

    /// Shared stop flag
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Shared heartbeat
    pub fn heartbeat(&self) -> Arc<Heartbeat> {
        self.heartbeat.clone()
    }

    /// Whether the thread has returned
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the thread to exit (unbounded)
    pub fn join(self) -> Result<AcquisitionSummary, AcquisitionError> {
        self.join.join().map_err(|_| AcquisitionError::Panicked)?
    }
}

/// Acquisition loop owning one source
pub struct AcquisitionThread {
    source: Box<dyn FrameSource + Send>,
    frames: Arc<FrameRingBuffer>,
    stacks: Arc<StackRingBuffer>,
    stacker: Option<StackAccumulator>,
    config: AcquisitionConfig,
    stop: StopFlag,
    heartbeat: Arc<Heartbeat>,
}

impl AcquisitionThread {
    /// Prepare an acquisition loop. Stacking runs only when `stack.enabled`.
    pub fn new(
        source: Box<dyn FrameSource + Send>,
        frames: Arc<FrameRingBuffer>,
        stacks: Arc<StackRingBuffer>,
        stack: &StackConfig,
        config: AcquisitionConfig,
    ) -> Result<Self, AcquisitionError> {
        let stacker = if stack.enabled {
            Some(StackAccumulator::new(stack.clone())?)
        } else {
            None
        };

        Ok(Self {
            source,
            frames,
            stacks,
            stacker,
            config,
            stop: StopFlag::new(),
            heartbeat: Arc::new(Heartbeat::new()),
        })
    }

    /// Start the loop on a dedicated thread
    pub fn spawn(self) -> Result<AcquisitionHandle, AcquisitionError> {
        let stop = self.stop.clone();
        let heartbeat = self.heartbeat.clone();
        let join = std::thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || self.run())
            .map_err(|e| AcquisitionError::Spawn(e.to_string()))?;

        Ok(AcquisitionHandle {
            stop,
            heartbeat,
            join,
        })
    }

    /// Run the grab loop on the current thread until the source ends or a
    /// stop is requested. Both rings are closed on exit.
    pub fn run(mut self) -> Result<AcquisitionSummary, AcquisitionError> {
        info!("Starting acquisition from {}", self.source.describe());
        let result = self.grab_loop();
        self.frames.close();
        self.stacks.close();

        match &result {
            Ok(summary) => info!(
                "Acquisition stopped: {} frames, {} failed grabs, {} stacks",
                summary.frames_grabbed, summary.grab_failures, summary.stacks_emitted
            ),
            Err(e) => error!("Acquisition aborted: {}", e),
        }
        result
    }

    fn grab_loop(&mut self) -> Result<AcquisitionSummary, AcquisitionError> {
        let mut summary = AcquisitionSummary::default();
        let mut next_number: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            match self.source.grab_image() {
                Ok(mut frame) => {
                    consecutive_failures = 0;
                    frame.number = next_number;
                    summary.frames_grabbed += 1;
                    metrics::counter!("acquisition_frames_total").increment(1);

                    if let Some(evicted) = self.frames.push(frame) {
                        summary.frames_evicted += 1;
                        metrics::counter!("acquisition_frames_evicted_total").increment(1);
                        debug!("Frame {} evicted from ring", evicted);
                    }

                    if let (Some(stacker), Some(latest)) = (self.stacker.as_mut(), self.frames.latest()) {
                        if let Some(stack) = stacker.push(&latest) {
                            summary.stacks_emitted += 1;
                            metrics::counter!("acquisition_stacks_total").increment(1);
                            self.stacks.push(stack);
                        }
                    }
                }
                Err(CameraError::EndOfStream) => {
                    info!("Source exhausted after frame {}", next_number.saturating_sub(1));
                    break;
                }
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    summary.grab_failures += 1;
                    metrics::counter!("acquisition_grab_failures_total").increment(1);
                    warn!(
                        "Grab for frame {} failed (attempt {}): {}",
                        next_number, consecutive_failures, e
                    );

                    if self.config.max_consecutive_failures != 0
                        && consecutive_failures >= self.config.max_consecutive_failures
                    {
                        return Err(AcquisitionError::TooManyFailures(consecutive_failures));
                    }
                }
                Err(e) => return Err(e.into()),
            }

            // The counter advances on failed grabs too, so consumers see the gap.
            self.heartbeat.beat(next_number);
            next_number += 1;
            metrics::gauge!("acquisition_ring_fill").set(self.frames.fill_ratio());

            if self.stop.is_requested() {
                break;
            }
        }

        Ok(summary)
    }
}
