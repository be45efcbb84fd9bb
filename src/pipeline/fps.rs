//! Rolling frame-rate measurement

use std::time::Instant;

/// Frame-rate counter over a fixed time window.
///
/// Each accepted frame adds the gap since the previous frame to the window.
/// The window closes on the frame nearest its end: once the accumulated time
/// is within half a frame gap of the window length, the rate is computed as
/// frames / accumulated time and the window starts over. Thirty frames 33 ms
/// apart therefore close a one second window at 990 ms. Dividing by the
/// accumulated gaps rather than wall-clock span keeps bursts from skewing the
/// result.
///
/// Lifetime totals (frames and milliseconds) are kept alongside for
/// duration and frame-count limited recordings.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window_ms: f64,
    frame_time1: Instant,
    frame_time2: Instant,
    frames_in_window: u64,
    elapsed_in_window: f64,
    fps: f64,
    total_frames: u64,
    total_time: f64,
}

impl FpsMeter {
    pub fn new(window_ms: f64) -> Self {
        let now = Instant::now();
        Self {
            window_ms,
            frame_time1: now,
            frame_time2: now,
            frames_in_window: 0,
            elapsed_in_window: 0.0,
            fps: 0.0,
            total_frames: 0,
            total_time: 0.0,
        }
    }

    pub fn set_window(&mut self, window_ms: f64) {
        self.window_ms = window_ms;
    }

    pub fn window(&self) -> f64 {
        self.window_ms
    }

    /// Account for one frame. Returns `true` when the window rolled over and
    /// [`frames_per_second`](Self::frames_per_second) holds a fresh value.
    pub fn on_frame(&mut self) -> bool {
        self.on_frame_at(Instant::now())
    }

    pub fn on_frame_at(&mut self, now: Instant) -> bool {
        self.frame_time2 = self.frame_time1;
        self.frame_time1 = now;

        let delta = self.delta_time();
        self.frames_in_window += 1;
        self.elapsed_in_window += delta;
        self.total_frames += 1;
        self.total_time += delta;

        if self.elapsed_in_window + delta / 2.0 >= self.window_ms {
            self.fps = if self.elapsed_in_window > 0.0 {
                self.frames_in_window as f64 * 1000.0 / self.elapsed_in_window
            } else {
                0.0
            };
            self.frames_in_window = 0;
            self.elapsed_in_window = 0.0;
            return true;
        }
        false
    }

    /// Milliseconds between the last two frames
    pub fn delta_time(&self) -> f64 {
        self.frame_time1
            .saturating_duration_since(self.frame_time2)
            .as_secs_f64()
            * 1000.0
    }

    pub fn frames_per_second(&self) -> f64 {
        self.fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Milliseconds accumulated since the last reset
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.frame_time1 = now;
        self.frame_time2 = now;
        self.frames_in_window = 0;
        self.elapsed_in_window = 0.0;
        self.fps = 0.0;
        self.total_frames = 0;
        self.total_time = 0.0;
    }
}
