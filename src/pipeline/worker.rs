//! The single consumer of the frame queue

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::capture::frame::{Frame, FrameGeometry, PixelFormat};
use crate::output::sink::PreviewBlob;
use crate::pipeline::gamma::SRGB_LUT;
use crate::pipeline::manager::Shared;
use crate::pipeline::preview::PreviewRunner;
use crate::pipeline::subframe::subframe;

pub(crate) struct Worker {
    shared: Arc<Shared>,
    preview: PreviewRunner,
    /// Reused crop buffer, resized whenever the stream frame changes
    crop: Vec<u8>,
}

impl Worker {
    pub fn new(shared: Arc<Shared>) -> std::io::Result<Self> {
        Ok(Self {
            shared,
            preview: PreviewRunner::new("stream-preview")?,
            crop: Vec::new(),
        })
    }

    pub fn run(mut self) {
        self.pin_core();
        let watchdog = Duration::from_millis(self.shared.pipeline.close_watchdog_ms.max(1));

        while !self.shared.terminate.load(Ordering::SeqCst) {
            let Some(frame) = self.shared.queue.pop_timeout(watchdog) else {
                if self.shared.terminate.load(Ordering::SeqCst) {
                    break;
                }
                if self.shared.closing.load(Ordering::SeqCst) {
                    warn!(
                        timeout_ms = watchdog.as_millis() as u64,
                        "No frames while closing, finishing the recording"
                    );
                    self.shared.finish_recording(false);
                }
                continue;
            };

            let shared = self.shared.clone();
            let _done = shared.queue.done_guard();
            self.process(frame);
        }
        debug!("Stream worker stopped");
    }

    fn pin_core(&self) {
        let Some(core) = self.shared.pipeline.worker_core else {
            return;
        };
        let Some(id) = core_affinity::get_core_ids()
            .unwrap_or_default()
            .into_iter()
            .find(|id| id.id == core)
        else {
            warn!(core, "Worker core not available");
            return;
        };
        if core_affinity::set_for_current(id) {
            info!(core, "Stream worker pinned");
        } else {
            warn!(core, "Failed to pin stream worker");
        }
    }

    fn process(&mut self, frame: Frame) {
        let shared = &self.shared;
        let source = shared.source_geometry();
        let compressed = source.pixel_format.is_compressed();

        let dst = self.stream_frame(&source);

        if !compressed && frame.data.len() < source.total_size() {
            error!(
                len = frame.data.len(),
                expected = source.total_size(),
                "Frame is smaller than the source geometry, skipping"
            );
            shared.stats.skipped();
            return;
        }

        let cropped = !compressed && !dst.same_rect(&source);
        if cropped && !subframe(&frame.data, &source, &mut self.crop, &dst) {
            error!(?dst, "Stream frame outside the source, skipping");
            shared.stats.skipped();
            return;
        }
        let payload: &[u8] = if cropped { &self.crop } else { &frame.data };

        {
            let mut record = shared.record.lock();
            if frame.record && record.state.is_on() && !shared.closing.load(Ordering::SeqCst) {
                let started = Instant::now();
                match record.recorders.current_mut().write_frame(payload, frame.timestamp) {
                    Ok(()) => {
                        shared.stats.written();
                        metrics::histogram!("record_write_seconds")
                            .record(started.elapsed().as_secs_f64());
                    }
                    Err(e) => {
                        error!("Recording failed: {e}");
                        shared.closing.store(true, Ordering::SeqCst);
                    }
                }
            }
        }

        if !shared.streaming.load(Ordering::SeqCst) || !shared.preview_meter.lock().on_frame() {
            return;
        }

        let data = if compressed {
            frame.data.clone()
        } else if dst.pixel_depth > 8 {
            let mut out = vec![0u8; dst.pixels() * dst.pixel_format.components()];
            SRGB_LUT.apply(payload, &mut out);
            Bytes::from(out)
        } else if cropped {
            Bytes::copy_from_slice(payload)
        } else {
            frame.data.clone()
        };

        let shared = shared.clone();
        if self.preview.start(move || shared.upload_preview(data, dst)) {
            debug!("Preview still pending, replaced");
        }
    }

    /// Current stream frame, initialized or re-clamped against `source`.
    fn stream_frame(&self, source: &FrameGeometry) -> FrameGeometry {
        let shared = &self.shared;
        let frame = {
            let mut layout = shared.layout.lock();
            let frame = match layout.stream_frame {
                Some(current) if current.w > 0 && current.h > 0 => {
                    let clamped = current.clamped_to(source);
                    if clamped == current {
                        return current;
                    }
                    warn!(?current, ?clamped, "Stream frame no longer fits the source");
                    clamped
                }
                _ => *source,
            };
            layout.stream_frame = Some(frame);
            frame
        };
        shared.apply_stream_frame(frame);
        frame
    }
}

impl Shared {
    /// Runs on the preview runner thread.
    fn upload_preview(&self, data: Bytes, geometry: FrameGeometry) {
        let started = Instant::now();

        let result = if geometry.pixel_format == PixelFormat::Jpeg {
            self.sink.send(PreviewBlob {
                data,
                format: ".stream_jpg".into(),
                width: geometry.w,
                height: geometry.h,
            })
        } else {
            let compressed = self.device.is_compressed();
            self.encoders
                .lock()
                .current_mut()
                .upload(&*self.sink, &data, compressed)
        };

        match result {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.stats.previewed();
                metrics::histogram!("preview_upload_seconds").record(elapsed.as_secs_f64());
                self.observer.preview_delay(elapsed);
            }
            Err(e) => warn!("Preview upload failed: {e}"),
        }
    }
}
