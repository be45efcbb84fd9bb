use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Idle,
    Streaming,
}

/// How a recording was started and when it ends on its own
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RecordState {
    Off,
    /// Runs until stopped
    OnManual,
    /// Seconds of accumulated capture time
    OnByDuration(f64),
    OnByFrameCount(u64),
}

/// Requested recording kind, see [`StreamManager::start_recording`](crate::StreamManager::start_recording)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordMode {
    Manual,
    Duration(Duration),
    FrameCount(u64),
}

impl From<RecordMode> for RecordState {
    fn from(mode: RecordMode) -> Self {
        match mode {
            RecordMode::Manual => RecordState::OnManual,
            RecordMode::Duration(d) => RecordState::OnByDuration(d.as_secs_f64()),
            RecordMode::FrameCount(n) => RecordState::OnByFrameCount(n),
        }
    }
}

impl RecordState {
    pub fn is_on(&self) -> bool {
        !matches!(self, RecordState::Off)
    }

    /// Whether a limited recording has captured enough.
    pub fn limit_reached(&self, frames: u64, elapsed_ms: f64) -> bool {
        match *self {
            RecordState::OnByFrameCount(target) => frames >= target,
            RecordState::OnByDuration(secs) => elapsed_ms >= secs * 1000.0,
            RecordState::Off | RecordState::OnManual => false,
        }
    }
}

/// Last published frame rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FpsReadout {
    /// Fast window, for responsive display
    pub instant: f64,
    /// One second window
    pub average: f64,
}

/// What `submit_frame` did with a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Queued,
    /// Removed by the frame divisor
    Decimated,
    /// Neither streaming nor recording
    Discarded,
    /// Buffer limit exceeded
    Dropped,
    /// The call finalized a pending recording close instead
    Closed,
}

/// Which strategies accepted a pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSupport {
    pub recorder: bool,
    pub encoder: bool,
}
