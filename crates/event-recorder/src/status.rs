//! Recording status log

use crate::RecorderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Outcome of one recording attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Recorded,
    Failed,
}

/// One entry of the status log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStatus {
    /// Assigned by the log on insert
    pub seq: u64,
    pub track_id: u64,
    pub recorded_at: DateTime<Utc>,
    pub first_frame: u64,
    pub last_frame: u64,
    pub frames_written: usize,
    pub state: RecordingState,
    pub directory: Option<PathBuf>,
    pub error: Option<String>,
}

impl RecordingStatus {
    pub fn recorded(track_id: u64, window: (u64, u64), frames_written: usize, directory: PathBuf) -> Self {
        Self {
            seq: 0,
            track_id,
            recorded_at: Utc::now(),
            first_frame: window.0,
            last_frame: window.1,
            frames_written,
            state: RecordingState::Recorded,
            directory: Some(directory),
            error: None,
        }
    }

    pub fn failed(track_id: u64, window: (u64, u64), error: &RecorderError) -> Self {
        Self {
            seq: 0,
            track_id,
            recorded_at: Utc::now(),
            first_frame: window.0,
            last_frame: window.1,
            frames_written: 0,
            state: RecordingState::Failed,
            directory: None,
            error: Some(error.to_string()),
        }
    }
}

struct LogState {
    entries: VecDeque<RecordingStatus>,
    next_seq: u64,
}

/// In-memory status log shared between the recorder and the pipeline
pub struct RecordingLog {
    state: Mutex<LogState>,
    retention: usize,
}

impl RecordingLog {
    pub fn new(retention: usize) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: VecDeque::with_capacity(retention.min(1024)),
                next_seq: 1,
            }),
            retention: retention.max(1),
        }
    }

    /// Append an entry, evicting the oldest beyond retention; returns its sequence
    pub fn insert(&self, mut status: RecordingStatus) -> Result<u64, RecorderError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| RecorderError::Unavailable(format!("Lock error: {}", e)))?;

        status.seq = state.next_seq;
        state.next_seq += 1;

        while state.entries.len() >= self.retention {
            state.entries.pop_front();
        }

        let seq = status.seq;
        debug!("Recording status {} for track {}: {:?}", seq, status.track_id, status.state);
        state.entries.push_back(status);
        Ok(seq)
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<RecordingStatus>, RecorderError> {
        let state = self
            .state
            .lock()
            .map_err(|e| RecorderError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(state.entries.iter().rev().take(limit).cloned().collect())
    }

    /// Entries with the given state, oldest first
    pub fn with_state(&self, wanted: RecordingState) -> Result<Vec<RecordingStatus>, RecorderError> {
        let state = self
            .state
            .lock()
            .map_err(|e| RecorderError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(state.entries.iter().filter(|s| s.state == wanted).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecordingLog {
    fn default() -> Self {
        Self::new(1000)
    }
}
