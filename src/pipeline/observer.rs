//! Notifications for the layer that mirrors pipeline state to clients

use std::time::Duration;

use tracing::debug;

use crate::capture::frame::FrameGeometry;
use crate::pipeline::state::{FpsReadout, RecordState};

/// Receives state published by the stream manager.
///
/// Calls arrive from the capture, worker, preview and control threads, so
/// implementations must be cheap and must not call back into the manager.
pub trait StreamObserver: Send + Sync {
    fn fps_changed(&self, _fps: FpsReadout) {}

    fn stream_frame_changed(&self, _frame: FrameGeometry) {}

    /// Time the last preview upload took
    fn preview_delay(&self, _delay: Duration) {}

    fn streaming_changed(&self, _streaming: bool) {}

    fn recording_changed(&self, _state: RecordState) {}
}

pub struct NoopObserver;

impl StreamObserver for NoopObserver {}

/// Logs every notification at debug level
pub struct TracingObserver;

impl StreamObserver for TracingObserver {
    fn fps_changed(&self, fps: FpsReadout) {
        debug!(instant = fps.instant, average = fps.average, "FPS");
    }

    fn stream_frame_changed(&self, frame: FrameGeometry) {
        debug!(x = frame.x, y = frame.y, w = frame.w, h = frame.h, "Stream frame");
    }

    fn preview_delay(&self, delay: Duration) {
        debug!(delay_ms = delay.as_secs_f64() * 1000.0, "Preview uploaded");
    }

    fn streaming_changed(&self, streaming: bool) {
        debug!(streaming, "Stream state");
    }

    fn recording_changed(&self, state: RecordState) {
        debug!(?state, "Record state");
    }
}
