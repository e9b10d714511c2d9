//! Recorder thread

use crate::queue::{Popped, RecorderQueue};
use crate::recorder::EventRecorder;
use crate::status::{RecordingLog, RecordingStatus};
use crate::RecorderError;
use detection::ConfirmedEvent;
use frame_buffer::FrameRingBuffer;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Counters reported when the recorder exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderSummary {
    pub recorded: u64,
    pub failed: u64,
}

/// Handle on a running recorder thread
pub struct RecorderHandle {
    join: JoinHandle<RecorderSummary>,
}

impl RecorderHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the thread to drain its queue and exit
    pub fn join(self) -> Result<RecorderSummary, RecorderError> {
        self.join
            .join()
            .map_err(|_| RecorderError::Unavailable("recorder thread panicked".into()))
    }
}

/// Consumes confirmed events and records them with the frames of their window
pub struct RecorderWorker<R: EventRecorder> {
    recorder: R,
    queue: Arc<RecorderQueue>,
    frames: Arc<FrameRingBuffer>,
    log: Arc<RecordingLog>,
    window_timeout: Duration,
}

impl<R: EventRecorder + 'static> RecorderWorker<R> {
    pub fn new(
        recorder: R,
        queue: Arc<RecorderQueue>,
        frames: Arc<FrameRingBuffer>,
        log: Arc<RecordingLog>,
        window_timeout: Duration,
    ) -> Self {
        Self {
            recorder,
            queue,
            frames,
            log,
            window_timeout,
        }
    }

    pub fn spawn(self) -> Result<RecorderHandle, RecorderError> {
        let join = std::thread::Builder::new()
            .name("recorder".into())
            .spawn(move || self.run())
            .map_err(|e| RecorderError::Unavailable(format!("spawn failed: {}", e)))?;
        Ok(RecorderHandle { join })
    }

    /// Record events until the queue is closed and drained
    pub fn run(mut self) -> RecorderSummary {
        info!("Recorder started");
        let mut summary = RecorderSummary::default();
        loop {
            match self.queue.pop(POLL_INTERVAL) {
                Popped::Event(event) => {
                    if self.handle(&event) {
                        summary.recorded += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                Popped::Timeout => continue,
                Popped::Closed => break,
            }
        }
        info!(
            "Recorder stopped: {} recorded, {} failed",
            summary.recorded, summary.failed
        );
        summary
    }

    fn handle(&mut self, confirmed: &ConfirmedEvent) -> bool {
        let window = confirmed.window;
        if !self.frames.wait_for_sequence(window.last, self.window_timeout) {
            debug!(
                "Frame {} not acquired, recording the available part of {}..={}",
                window.last, window.first, window.last
            );
        }
        let frames = self.frames.range(window.first, window.last);
        if frames.first().map_or(true, |f| f.number > window.first) {
            warn!(
                "Event window {}..={} partly evicted from the ring",
                window.first, window.last
            );
        }

        let span = (window.first, window.last);
        let status = match self.recorder.record(confirmed, &frames) {
            Ok(outcome) => {
                metrics::counter!("recorder_events_recorded_total").increment(1);
                RecordingStatus::recorded(confirmed.event.id, span, outcome.frames_written, outcome.directory)
            }
            Err(e) => {
                error!("Recording track {} failed: {}", confirmed.event.id, e);
                metrics::counter!("recorder_events_failed_total").increment(1);
                RecordingStatus::failed(confirmed.event.id, span, &e)
            }
        };
        let ok = status.error.is_none();
        if let Err(e) = self.log.insert(status) {
            warn!("Status log unavailable: {}", e);
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::confirmed;
    use crate::recorder::RecordingOutcome;
    use crate::status::RecordingState;
    use camera_capture::{BitDepth, Frame};
    use ndarray::Array2;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records the frame numbers it was handed
    struct CapturingRecorder {
        seen: Arc<Mutex<Vec<Vec<u64>>>>,
        fail: bool,
    }

    impl EventRecorder for CapturingRecorder {
        fn record(&mut self, _event: &ConfirmedEvent, frames: &[Arc<Frame>]) -> Result<RecordingOutcome, RecorderError> {
            if self.fail {
                return Err(RecorderError::Unavailable("disk full".into()));
            }
            self.seen
                .lock()
                .unwrap()
                .push(frames.iter().map(|f| f.number).collect());
            Ok(RecordingOutcome {
                id: uuid::Uuid::nil(),
                directory: PathBuf::from("mem"),
                frames_written: frames.len(),
                previews_written: 0,
                missing_frames: 0,
            })
        }
    }

    fn ring_with(numbers: std::ops::Range<u64>, capacity: usize) -> Arc<FrameRingBuffer> {
        let ring = Arc::new(FrameRingBuffer::new(capacity).unwrap());
        for n in numbers {
            let mut f = Frame::new(Array2::zeros((2, 2)), BitDepth::Mono8);
            f.number = n;
            ring.push(f);
        }
        ring
    }

    #[test]
    fn test_records_window_slice() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(RecorderQueue::new(4));
        let log = Arc::new(RecordingLog::new(10));
        let frames = ring_with(0..30, 50);

        let worker = RecorderWorker::new(
            CapturingRecorder { seen: seen.clone(), fail: false },
            queue.clone(),
            frames,
            log.clone(),
            Duration::from_millis(50),
        );
        let handle = worker.spawn().unwrap();
        queue.push(confirmed(1, 12, 2, (10, 20)));
        queue.close();

        let summary = handle.join().unwrap();
        assert_eq!(summary, RecorderSummary { recorded: 1, failed: 0 });
        assert_eq!(seen.lock().unwrap()[0], (10..=20).collect::<Vec<_>>());
        assert_eq!(log.recent(1).unwrap()[0].frames_written, 11);
    }

    #[test]
    fn test_waits_for_window_end() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(RecorderQueue::new(4));
        let frames = ring_with(0..5, 50);

        let worker = RecorderWorker::new(
            CapturingRecorder { seen: seen.clone(), fail: false },
            queue.clone(),
            frames.clone(),
            Arc::new(RecordingLog::new(10)),
            Duration::from_secs(5),
        );
        let handle = worker.spawn().unwrap();
        queue.push(confirmed(1, 2, 2, (2, 8)));

        std::thread::sleep(Duration::from_millis(30));
        for n in 5..10 {
            let mut f = Frame::new(Array2::zeros((2, 2)), BitDepth::Mono8);
            f.number = n;
            frames.push(f);
        }
        queue.close();
        handle.join().unwrap();
        assert_eq!(seen.lock().unwrap()[0], (2..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_failures_logged_not_retried() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(RecorderQueue::new(4));
        let log = Arc::new(RecordingLog::new(10));
        let frames = ring_with(0..10, 20);
        frames.close();

        let worker = RecorderWorker::new(
            CapturingRecorder { seen, fail: true },
            queue.clone(),
            frames,
            log.clone(),
            Duration::from_millis(10),
        );
        queue.push(confirmed(1, 0, 2, (0, 3)));
        queue.push(confirmed(2, 0, 2, (0, 30)));
        queue.close();

        let summary = worker.run();
        assert_eq!(summary, RecorderSummary { recorded: 0, failed: 2 });
        let failed = log.with_state(RecordingState::Failed).unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed[0].error.as_deref().unwrap().contains("disk full"));
    }
}
