//! Thread wiring: acquisition, detection, recorder and stack writer

use crate::detect::{DetectionHandle, DetectionSummary, DetectionWorker};
use crate::settings::Settings;
use crate::PipelineError;
use acquisition::{AcquisitionHandle, AcquisitionSummary, AcquisitionThread, Heartbeat};
use camera_capture::open_source;
use event_recorder::{
    DirectoryRecorder, RecorderHandle, RecorderQueue, RecorderSummary, RecorderWorker,
    RecordingLog, StackWriter, StackWriterHandle,
};
use frame_buffer::{FrameRingBuffer, StackRingBuffer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// What every thread reported on exit
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub acquisition: AcquisitionSummary,
    pub detection: DetectionSummary,
    pub recorder: Option<RecorderSummary>,
    pub stacks_written: Option<u64>,
}

/// Validated settings, ready to start
pub struct Pipeline {
    settings: Settings,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Result<Self, PipelineError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    /// Open the source and start every thread
    pub fn start(&self) -> Result<PipelineHandle, PipelineError> {
        let s = &self.settings;
        let source = open_source(&s.source)?;
        info!("Source: {}", source.describe());

        let frames = Arc::new(FrameRingBuffer::new(s.acquisition.ring_capacity)?);
        let stacks = Arc::new(StackRingBuffer::new(s.stack.buffer_capacity)?);
        let log = Arc::new(RecordingLog::new(s.recorder.log_retention));

        let (queue, recorder) = if s.recorder.enabled {
            let queue = Arc::new(RecorderQueue::new(s.recorder.queue_capacity));
            let worker = RecorderWorker::new(
                DirectoryRecorder::new(&s.recorder),
                queue.clone(),
                frames.clone(),
                log.clone(),
                Duration::from_millis(s.recorder.window_timeout_ms),
            );
            (Some(queue), Some(worker.spawn()?))
        } else {
            (None, None)
        };

        let stack_writer = if s.stack.enabled {
            Some(StackWriter::new(stacks.clone(), s.recorder.stack_dir.clone()).spawn()?)
        } else {
            None
        };

        let acquisition = AcquisitionThread::new(
            source,
            frames.clone(),
            stacks,
            &s.stack,
            s.acquisition.clone(),
        )?
        .spawn()?;

        let detection = DetectionWorker::new(
            s.detection.clone(),
            frames,
            queue.clone(),
            acquisition.stop_flag(),
        )
        .spawn()?;

        info!("Pipeline started");
        Ok(PipelineHandle {
            acquisition,
            detection,
            recorder,
            queue,
            stack_writer,
            log,
            stall_timeout: Duration::from_millis(s.acquisition.stall_timeout_ms),
        })
    }
}

/// Running pipeline
pub struct PipelineHandle {
    acquisition: AcquisitionHandle,
    detection: DetectionHandle,
    recorder: Option<RecorderHandle>,
    queue: Option<Arc<RecorderQueue>>,
    stack_writer: Option<StackWriterHandle>,
    log: Arc<RecordingLog>,
    stall_timeout: Duration,
}

impl PipelineHandle {
    /// Request a cooperative stop; takes effect after the current grab
    pub fn stop(&self) {
        self.acquisition.stop();
    }

    pub fn heartbeat(&self) -> Arc<Heartbeat> {
        self.acquisition.heartbeat()
    }

    /// Recording outcomes so far
    pub fn recording_log(&self) -> Arc<RecordingLog> {
        self.log.clone()
    }

    /// Whether acquisition and detection have both returned
    pub fn is_finished(&self) -> bool {
        self.acquisition.is_finished() && self.detection.is_finished()
    }

    /// Log an error when the acquisition thread has not completed a grab
    /// within the stall timeout. Returns whether it is stalled.
    pub fn check_stall(&self) -> bool {
        if self.acquisition.is_finished() {
            return false;
        }
        let heartbeat = self.acquisition.heartbeat();
        if heartbeat.is_stalled(self.stall_timeout) {
            error!(
                "Acquisition stalled: no grab for {:?} (last frame {})",
                heartbeat.silence(),
                heartbeat.last_frame()
            );
            metrics::counter!("pipeline_stalls_total").increment(1);
            return true;
        }
        false
    }

    /// Wait for every thread to exit, in pipeline order. Blocks unboundedly.
    pub fn join(self) -> Result<PipelineReport, PipelineError> {
        let acquisition = self.acquisition.join();
        let detection = self.detection.join();

        if let Some(queue) = &self.queue {
            queue.close();
        }
        let recorder = self.recorder.map(|r| r.join()).transpose();
        let stacks_written = self.stack_writer.map(|w| w.join()).transpose();

        let report = PipelineReport {
            acquisition: acquisition?,
            detection: detection?,
            recorder: recorder?,
            stacks_written: stacks_written?,
        };
        info!(
            "Pipeline finished: {} frames, {} confirmed events",
            report.acquisition.frames_grabbed, report.detection.confirmed
        );
        Ok(report)
    }
}

/// Poll the pipeline every `period` until it finishes, reporting stalls
pub async fn supervise(handle: &PipelineHandle, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        if handle.is_finished() {
            break;
        }
        handle.check_stall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{SimulationConfig, SourceConfig};
    use event_recorder::RecordingState;

    fn scenario_settings(root: &std::path::Path) -> Settings {
        let mut settings = Settings::default();
        settings.source = SourceConfig::Simulated(SimulationConfig {
            width: 100,
            height: 100,
            moving_frames: 15,
            total_frames: 40,
            ..Default::default()
        });
        settings.acquisition.ring_capacity = 64;
        settings.detection = detection::DetectionConfig {
            time_before_frames: 2,
            time_after_frames: 3,
            ..detection::DetectionConfig::full_resolution()
        };
        settings.recorder.output_dir = root.join("events");
        settings.recorder.stack_dir = root.join("stacks");
        settings.recorder.window_timeout_ms = 1000;
        settings.stack.enabled = true;
        settings.stack.frame_to_sum = 10;
        settings
    }

    #[test]
    fn test_end_to_end_records_one_meteor() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Pipeline::new(scenario_settings(dir.path()))
            .unwrap()
            .start()
            .unwrap();
        let log = handle.recording_log();
        let report = handle.join().unwrap();

        assert_eq!(report.acquisition.frames_grabbed, 40);
        assert_eq!(report.detection.confirmed, 1);
        assert_eq!(report.recorder.as_ref().map(|r| r.recorded), Some(1));
        assert_eq!(report.stacks_written, Some(4));

        let entries = log.recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, RecordingState::Recorded);
        assert_eq!(entries[0].frames_written, 18);
        let event_dir = entries[0].directory.clone().unwrap();
        assert!(event_dir.join("event.json").exists());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = Settings::default();
        settings.detection.grid_rows = 0;
        assert!(matches!(Pipeline::new(settings), Err(PipelineError::Detection(_))));
    }

    #[test]
    fn test_stop_request_ends_endless_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = scenario_settings(dir.path());
        settings.source = SourceConfig::Simulated(SimulationConfig {
            width: 64,
            height: 48,
            ..Default::default()
        });
        settings.recorder.enabled = false;
        settings.stack.enabled = false;

        let handle = Pipeline::new(settings).unwrap().start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.check_stall());
        handle.stop();
        let report = handle.join().unwrap();
        assert!(report.acquisition.frames_grabbed > 0);
        assert!(report.recorder.is_none());
    }

    #[tokio::test]
    async fn test_supervise_returns_when_finished() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Pipeline::new(scenario_settings(dir.path()))
            .unwrap()
            .start()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(30), supervise(&handle, Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(handle.is_finished());
        handle.join().unwrap();
    }
}
