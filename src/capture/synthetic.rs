//! Test-pattern camera producing frames on its own thread

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::capture::device::Capture;
use crate::capture::frame::{FrameGeometry, PixelFormat};
use crate::error::{Result, StreamError};

/// Receives `(buffer, timestamp)` for every produced frame
pub type FrameCallback = Arc<dyn Fn(&[u8], u64) + Send + Sync>;

/// Synthetic capture device.
///
/// Behaves like a driver wrapping a vendor SDK: `start` spawns the acquisition
/// thread, every frame is handed to the callback from that thread.
pub struct SyntheticCamera {
    geometry: FrameGeometry,
    interval: Duration,
    callback: OnceCell<FrameCallback>,
    running: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, pixel_depth: u8, fps: f64) -> Self {
        Self {
            geometry: FrameGeometry::new(width, height, PixelFormat::Mono, pixel_depth),
            interval: Duration::from_secs_f64(1.0 / fps.max(0.001)),
            callback: OnceCell::new(),
            running: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            thread: Mutex::new(None),
        }
    }

    /// Connect the frame consumer. Only the first call has an effect.
    pub fn set_frame_callback(&self, callback: FrameCallback) {
        if self.callback.set(callback).is_err() {
            debug!("Frame callback already connected");
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn frames_produced(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Diagonal gradient that moves one pixel per frame.
    pub fn render(geometry: &FrameGeometry, sequence: u64) -> Vec<u8> {
        let bpp = geometry.bytes_per_pixel();
        let max = (1u32 << geometry.pixel_depth.min(16)) - 1;
        let mut out = Vec::with_capacity(geometry.total_size());

        for row in 0..geometry.h as u64 {
            for col in 0..geometry.w as u64 {
                let value = ((row + col + sequence) % (max as u64 + 1)) as u32;
                if bpp == 1 {
                    out.push(value as u8);
                } else {
                    out.extend_from_slice(&(value as u16).to_le_bytes());
                }
            }
        }
        out
    }
}

impl Capture for SyntheticCamera {
    #[instrument(skip(self))]
    fn start(&self) -> Result<()> {
        let callback = self
            .callback
            .get()
            .cloned()
            .ok_or_else(|| StreamError::CaptureStartFailed("no frame consumer connected".into()))?;

        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let sequence = self.sequence.clone();
        let geometry = self.geometry;
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    let seq = sequence.fetch_add(1, Ordering::Relaxed);
                    let buffer = Self::render(&geometry, seq);
                    let timestamp = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_micros() as u64)
                        .unwrap_or_default();
                    callback(&buffer, timestamp);
                    thread::sleep(interval);
                }
            })?;

        *slot = Some(handle);
        info!(
            width = geometry.w,
            height = geometry.h,
            depth = geometry.pixel_depth,
            "Synthetic capture started"
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            // The stream manager may stop us from inside the frame callback.
            if handle.thread().id() != thread::current().id() {
                handle
                    .join()
                    .map_err(|_| StreamError::CaptureStopFailed("capture thread panicked".into()))?;
            }
        }
        info!("Synthetic capture stopped");
        Ok(())
    }

    fn source_geometry(&self) -> FrameGeometry {
        self.geometry
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_render_sizes() {
        let cam = SyntheticCamera::new(8, 4, 16, 30.0);
        let frame = SyntheticCamera::render(&cam.geometry(), 0);
        assert_eq!(frame.len(), 8 * 4 * 2);

        let cam8 = SyntheticCamera::new(8, 4, 8, 30.0);
        let frame = SyntheticCamera::render(&cam8.geometry(), 3);
        assert_eq!(frame.len(), 32);
        assert_eq!(frame[0], 3);
    }

    #[test]
    fn test_start_requires_callback() {
        let cam = SyntheticCamera::new(4, 4, 8, 100.0);
        assert!(matches!(cam.start(), Err(StreamError::CaptureStartFailed(_))));
    }

    #[test]
    fn test_produces_frames_until_stopped() {
        let cam = SyntheticCamera::new(4, 4, 8, 500.0);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        cam.set_frame_callback(Arc::new(move |buf: &[u8], _ts: u64| {
            assert_eq!(buf.len(), 16);
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        cam.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        cam.stop().unwrap();

        let produced = seen.load(Ordering::Relaxed);
        assert!(produced > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(seen.load(Ordering::Relaxed), produced);
    }
}
