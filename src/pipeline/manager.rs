//! Stream and record orchestration for one capture device

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use chrono::Utc;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::device::Capture;
use crate::capture::frame::{Frame, FrameGeometry, PixelFormat};
use crate::error::{Result, StreamError};
use crate::output::encoder::Encoder;
use crate::output::recorder::Recorder;
use crate::output::registry::{EncoderRegistry, RecorderRegistry};
use crate::output::sink::{NullSink, PreviewSink};
use crate::pipeline::fps::FpsMeter;
use crate::pipeline::observer::{NoopObserver, StreamObserver};
use crate::pipeline::queue::FrameQueue;
use crate::pipeline::state::{
    FormatSupport, FpsReadout, FrameDisposition, RecordMode, RecordState, StreamState,
};
use crate::pipeline::stats::{FrameStats, StatsSnapshot};
use crate::pipeline::worker::Worker;
use crate::utils;
use crate::{Config, Limits, PipelineConfig, RecordOptions, StreamOptions};

const DROP_WARN_INTERVAL_MS: u64 = 1000;
const PREVIEW_WINDOW_MIN_FPS: f64 = 1.0;

/// FPS meters advanced on the producer path
pub(crate) struct Meters {
    pub fast: FpsMeter,
    pub average: FpsMeter,
    /// Lifetime counter for duration and frame-count limits
    pub recorder: FpsMeter,
    pub divisor_count: u64,
}

/// Pixel layout and destination crop
#[derive(Default)]
pub(crate) struct Layout {
    /// Overrides the layout reported by the device
    pub format: Option<(PixelFormat, u8)>,
    /// `None` until the first frame after (re)connect
    pub stream_frame: Option<FrameGeometry>,
}

/// Recorder strategies and the record state they are written under
pub(crate) struct RecordSlot {
    pub recorders: RecorderRegistry,
    pub state: RecordState,
    pub path: Option<PathBuf>,
}

/// State shared between the control API, the producer path and the worker.
pub(crate) struct Shared {
    pub device: Arc<dyn Capture>,
    pub sink: Arc<dyn PreviewSink>,
    pub observer: Arc<dyn StreamObserver>,

    pub queue: FrameQueue<Frame>,
    pub stats: FrameStats,

    pub limits: ArcSwap<Limits>,
    pub stream_opts: ArcSwap<StreamOptions>,
    pub record_opts: ArcSwap<RecordOptions>,
    pub pipeline: PipelineConfig,

    /// Serializes control commands
    control: Mutex<()>,
    pub record: Mutex<RecordSlot>,
    pub encoders: Mutex<EncoderRegistry>,
    pub layout: Mutex<Layout>,
    meters: Mutex<Meters>,
    pub preview_meter: Mutex<FpsMeter>,

    pub streaming: AtomicBool,
    pub closing: AtomicBool,
    /// A producer reached the recording limit and is draining the queue
    completing: AtomicBool,
    capture_running: AtomicBool,
    pub terminate: AtomicBool,
    /// Lock-free mirror of `RecordSlot::state`
    record_state: AtomicCell<RecordState>,
    fps: AtomicCell<FpsReadout>,
    fast_publish: Arc<AtomicBool>,

    epoch: Instant,
    last_drop_warn_ms: AtomicU64,
}

/// Builds a [`StreamManager`] around a capture device.
pub struct StreamManagerBuilder {
    device: Arc<dyn Capture>,
    config: Config,
    sink: Arc<dyn PreviewSink>,
    observer: Arc<dyn StreamObserver>,
    encoders: Vec<Box<dyn Encoder>>,
    recorders: Vec<Box<dyn Recorder>>,
}

impl StreamManagerBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn PreviewSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register an extra encoder; replaces a built-in one with the same name
    pub fn encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.encoders.push(encoder);
        self
    }

    pub fn recorder(mut self, recorder: Box<dyn Recorder>) -> Self {
        self.recorders.push(recorder);
        self
    }

    pub fn build(self) -> Result<StreamManager> {
        let config = self.config;

        let mut encoders = EncoderRegistry::with_defaults();
        for encoder in self.encoders {
            encoders.register(encoder);
        }
        if encoders.select(&config.stream.encoder).is_none() {
            return Err(StreamError::UnknownEncoder(config.stream.encoder.clone()));
        }

        let mut recorders = RecorderRegistry::with_defaults();
        for recorder in self.recorders {
            recorders.register(recorder);
        }
        if recorders.select(&config.record.recorder).is_none() {
            return Err(StreamError::UnknownRecorder(config.record.recorder.clone()));
        }

        let meters = Meters {
            fast: FpsMeter::new(config.stream.fast_window_ms),
            average: FpsMeter::new(config.stream.average_window_ms),
            recorder: FpsMeter::new(config.stream.average_window_ms),
            divisor_count: 0,
        };
        let preview_meter = FpsMeter::new(preview_window_ms(config.limits.max_preview_fps));

        let shared = Arc::new(Shared {
            device: self.device,
            sink: self.sink,
            observer: self.observer,
            queue: FrameQueue::new(),
            stats: FrameStats::default(),
            limits: ArcSwap::from_pointee(config.limits),
            stream_opts: ArcSwap::from_pointee(config.stream),
            record_opts: ArcSwap::from_pointee(config.record),
            pipeline: config.pipeline,
            control: Mutex::new(()),
            record: Mutex::new(RecordSlot {
                recorders,
                state: RecordState::Off,
                path: None,
            }),
            encoders: Mutex::new(encoders),
            layout: Mutex::new(Layout::default()),
            meters: Mutex::new(meters),
            preview_meter: Mutex::new(preview_meter),
            streaming: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            completing: AtomicBool::new(false),
            capture_running: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            record_state: AtomicCell::new(RecordState::Off),
            fps: AtomicCell::new(FpsReadout::default()),
            fast_publish: Arc::new(AtomicBool::new(false)),
            epoch: Instant::now(),
            last_drop_warn_ms: AtomicU64::new(0),
        });

        let worker = Worker::new(shared.clone())?;
        let handle = thread::Builder::new()
            .name("stream-worker".into())
            .spawn(move || worker.run())?;

        Ok(StreamManager {
            shared,
            worker: Some(handle),
        })
    }
}

/// Owns the frame queue, the FPS meters and the worker thread of one device.
///
/// `submit_frame` is the producer entry point and may be called from any
/// thread. Control calls are serialized internally and may come from any
/// other thread.
pub struct StreamManager {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl StreamManager {
    pub fn builder(device: Arc<dyn Capture>) -> StreamManagerBuilder {
        StreamManagerBuilder {
            device,
            config: Config::default(),
            sink: Arc::new(NullSink),
            observer: Arc::new(NoopObserver),
            encoders: Vec::new(),
            recorders: Vec::new(),
        }
    }

    pub fn new(
        device: Arc<dyn Capture>,
        sink: Arc<dyn PreviewSink>,
        config: Config,
    ) -> Result<Self> {
        Self::builder(device).sink(sink).config(config).build()
    }

    /// Start or stop the live stream.
    #[instrument(skip(self))]
    pub fn set_streaming(&self, enable: bool) -> Result<()> {
        let shared = &self.shared;
        let _control = shared.control.lock();

        if enable {
            if shared.streaming.load(Ordering::SeqCst) {
                return Ok(());
            }
            info!(
                exposure_secs = shared.stream_opts.load().exposure_secs,
                "Starting the video stream"
            );

            {
                let mut meters = shared.meters.lock();
                meters.fast.reset();
                meters.average.reset();
                meters.divisor_count = 0;
            }
            shared.preview_meter.lock().reset();

            if let Err(e) = shared.start_capture() {
                error!("Failed to start streaming: {e}");
                return Err(e);
            }

            shared.streaming.store(true, Ordering::SeqCst);
            shared.fps.store(FpsReadout::default());
            shared
                .record
                .lock()
                .recorders
                .current_mut()
                .set_stream_enabled(true);
            shared.observer.streaming_changed(true);
            Ok(())
        } else {
            shared.fps.store(FpsReadout::default());
            if !shared.streaming.load(Ordering::SeqCst) {
                return Ok(());
            }
            info!("The video stream has been disabled");

            shared.streaming.store(false, Ordering::SeqCst);
            let result = if shared.recording_or_closing() {
                Ok(())
            } else {
                shared.stop_capture()
            };

            shared
                .record
                .lock()
                .recorders
                .current_mut()
                .set_stream_enabled(false);
            shared.observer.streaming_changed(false);
            result
        }
    }

    /// Open a new record file and start writing frames to it.
    ///
    /// Returns the path of the file. Fails with [`StreamError::Busy`] while a
    /// recording is active or still closing.
    #[instrument(skip(self))]
    pub fn start_recording(&self, mode: RecordMode) -> Result<PathBuf> {
        let shared = &self.shared;
        let _control = shared.control.lock();

        if shared.recording_or_closing() {
            warn!("Recording device is busy");
            return Err(StreamError::Busy);
        }

        let opts = shared.record_opts.load();
        let filter = shared.device.filter_name();
        let fps = shared.fps.load();

        let path = {
            let mut record = shared.record.lock();
            let recorder = record.recorders.current_mut();
            recorder.set_fps(fps.average);

            let (dir, file) = utils::record_path(
                &opts.directory,
                &opts.file_name,
                recorder.extension(),
                filter.as_deref(),
                Utc::now(),
            );
            info!(path = %file.display(), "Record file");

            if let Err(e) = fs::create_dir_all(&dir) {
                warn!(dir = %dir.display(), "Failed to create directory: {e}");
                return Err(StreamError::RecorderOpenFailed {
                    path: dir,
                    reason: e.to_string(),
                });
            }

            recorder.open(&file).map_err(|e| match e {
                StreamError::RecorderOpenFailed { .. } => e,
                other => StreamError::RecorderOpenFailed {
                    path: file.clone(),
                    reason: other.to_string(),
                },
            })?;
            record.path = Some(file.clone());
            file
        };

        {
            let mut meters = shared.meters.lock();
            meters.recorder.reset();
            meters.divisor_count = 0;
            if !shared.streaming.load(Ordering::SeqCst) {
                meters.fast.reset();
                meters.average.reset();
            }
        }

        // The recorder stays open on failure; `close` or a later start handles it.
        if let Err(e) = shared.start_capture() {
            error!("Failed to start recording: {e}");
            return Err(e);
        }

        let state = RecordState::from(mode);
        {
            let mut record = shared.record.lock();
            record.state = state;
            shared.record_state.store(state);
        }
        info!(?state, "Starting video record");
        shared.observer.recording_changed(state);
        Ok(path)
    }

    /// Ask for the current recording to end.
    ///
    /// The file is closed by the next submitted frame, or by the worker once
    /// no frame arrived for `close_watchdog_ms`.
    #[instrument(skip(self))]
    pub fn stop_recording(&self) -> Result<()> {
        let shared = &self.shared;
        let _control = shared.control.lock();

        if !shared.record_state.load().is_on() || shared.closing.load(Ordering::SeqCst) {
            return Ok(());
        }
        info!("Recording stream has been disabled, closing the stream");
        shared.closing.store(true, Ordering::SeqCst);
        shared.fps.store(FpsReadout::default());
        Ok(())
    }

    /// End the recording now and close the recorder, even if already stopped.
    pub fn force_stop_recording(&self) {
        let _control = self.shared.control.lock();
        self.shared.finish_recording(true);
    }

    /// Close the current recorder without touching the record state.
    pub fn close(&self) -> Result<()> {
        self.shared.record.lock().recorders.current_mut().close()
    }

    /// Hand a captured buffer to the pipeline.
    ///
    /// Never blocks beyond a short lock, except when this frame completes a
    /// duration or frame-count recording: then it waits for the queue to be
    /// written out before closing the file.
    pub fn submit_frame(&self, buffer: &[u8], timestamp: u64) -> FrameDisposition {
        self.shared.submit_frame(buffer, timestamp)
    }

    /// Negotiate a new pixel layout with the current encoder and recorder.
    pub fn set_pixel_format(&self, format: PixelFormat, depth: u8) -> FormatSupport {
        let shared = &self.shared;
        {
            let mut layout = shared.layout.lock();
            if layout.format == Some((format, depth)) {
                return FormatSupport {
                    recorder: true,
                    encoder: true,
                };
            }
            layout.format = Some((format, depth));
        }

        let recorder = shared
            .record
            .lock()
            .recorders
            .current_mut()
            .set_pixel_format(format, depth);
        if !recorder {
            warn!(?format, depth, "Recorder does not support pixel format");
        }

        let encoder = shared
            .encoders
            .lock()
            .current_mut()
            .set_pixel_format(format, depth);
        if !encoder {
            warn!(?format, depth, "Encoder does not support pixel format");
        }

        FormatSupport { recorder, encoder }
    }

    /// Binned frame size from the driver; resets the crop when it changes.
    pub fn set_destination_size(&self, width: u32, height: u32) {
        let shared = &self.shared;
        let source = shared.source_geometry();
        let frame = {
            let mut layout = shared.layout.lock();
            let current = layout.stream_frame.unwrap_or(source);
            let frame = if current.w != width || current.h != height {
                FrameGeometry {
                    x: 0,
                    y: 0,
                    w: width,
                    h: height,
                    ..source
                }
            } else {
                current
            };
            let frame = frame.clamped_to(&source);
            layout.stream_frame = Some(frame);
            frame
        };
        shared.apply_stream_frame(frame);
    }

    /// Crop the stream to a rectangle of the source frame.
    ///
    /// The rectangle is clamped to the current source; the clamped value is
    /// returned.
    pub fn set_stream_frame(&self, x: u32, y: u32, w: u32, h: u32) -> Result<FrameGeometry> {
        let shared = &self.shared;
        let _control = shared.control.lock();
        if shared.recording_or_closing() {
            warn!("Cannot change the stream frame while recording");
            return Err(StreamError::Busy);
        }

        let source = shared.source_geometry();
        let frame = FrameGeometry {
            x,
            y,
            w,
            h,
            ..source
        }
        .clamped_to(&source);
        shared.layout.lock().stream_frame = Some(frame);
        shared.apply_stream_frame(frame);
        Ok(frame)
    }

    pub fn stream_frame(&self) -> Option<FrameGeometry> {
        self.shared.layout.lock().stream_frame
    }

    /// Forget the crop; the next frame reinitializes it to the full source.
    pub fn reset_stream_frame(&self) {
        self.shared.layout.lock().stream_frame = None;
    }

    pub fn set_limits(&self, max_buffer_mb: usize, max_preview_fps: f64) {
        let shared = &self.shared;
        shared.limits.store(Arc::new(Limits {
            max_buffer_mb,
            max_preview_fps,
        }));

        let mut meter = shared.preview_meter.lock();
        meter.set_window(preview_window_ms(max_preview_fps));
        meter.reset();
        debug!(max_buffer_mb, max_preview_fps, "Limits updated");
    }

    pub fn limits(&self) -> Limits {
        **self.shared.limits.load()
    }

    /// Drop every `divisor`th frame; 0 and 1 disable decimation.
    pub fn set_frame_divisor(&self, divisor: u32) {
        self.shared.update_stream_opts(|opts| opts.divisor = divisor);
        self.shared.meters.lock().divisor_count = 0;
    }

    pub fn set_target_exposure(&self, secs: f64) {
        self.shared.update_stream_opts(|opts| opts.exposure_secs = secs);
    }

    pub fn target_exposure(&self) -> f64 {
        self.shared.stream_opts.load().exposure_secs
    }

    pub fn target_fps(&self) -> f64 {
        let exposure = self.target_exposure();
        if exposure > 0.0 {
            1.0 / exposure
        } else {
            0.0
        }
    }

    pub fn set_record_options(&self, duration_secs: f64, frame_total: u64) -> Result<()> {
        let _control = self.shared.control.lock();
        if self.shared.recording_or_closing() {
            return Err(StreamError::Busy);
        }
        self.shared.update_record_opts(|opts| {
            opts.duration_secs = duration_secs;
            opts.frame_total = frame_total;
        });
        Ok(())
    }

    /// Set the directory and file name templates of future recordings.
    pub fn set_record_file(&self, directory: &str, file_name: &str) -> Result<()> {
        if file_name.contains('/') {
            warn!(file_name, "Record file name must not contain '/'");
            return Err(StreamError::InvalidFileName(file_name.to_string()));
        }
        self.shared.update_record_opts(|opts| {
            opts.directory = directory.to_string();
            opts.file_name = file_name.to_string();
        });
        Ok(())
    }

    pub fn record_options(&self) -> RecordOptions {
        (**self.shared.record_opts.load()).clone()
    }

    /// Path of the last opened record file
    pub fn record_file(&self) -> Option<PathBuf> {
        self.shared.record.lock().path.clone()
    }

    pub fn select_encoder(&self, name: &str) -> Result<()> {
        let shared = &self.shared;
        let (format, depth) = shared.pixel_layout();
        let frame = shared.layout.lock().stream_frame;

        let mut encoders = shared.encoders.lock();
        let Some(encoder) = encoders.select(name) else {
            warn!(name, "Unknown encoder");
            return Err(StreamError::UnknownEncoder(name.to_string()));
        };
        if !encoder.set_pixel_format(format, depth) {
            warn!(name, ?format, depth, "Encoder does not support pixel format");
        }
        if let Some(frame) = frame {
            encoder.set_size(frame.w, frame.h);
        }
        info!(name, "Encoder selected");
        Ok(())
    }

    pub fn select_recorder(&self, name: &str) -> Result<()> {
        let shared = &self.shared;
        let _control = shared.control.lock();
        if shared.recording_or_closing() {
            return Err(StreamError::Busy);
        }
        let (format, depth) = shared.pixel_layout();
        let frame = shared.layout.lock().stream_frame;

        let mut record = shared.record.lock();
        let Some(recorder) = record.recorders.select(name) else {
            warn!(name, "Unknown recorder");
            return Err(StreamError::UnknownRecorder(name.to_string()));
        };
        if !recorder.set_pixel_format(format, depth) {
            warn!(name, ?format, depth, "Recorder does not support pixel format");
        }
        if let Some(frame) = frame {
            recorder.set_size(frame.w, frame.h);
        }
        recorder.set_stream_enabled(shared.streaming.load(Ordering::SeqCst));
        info!(name, "Recorder selected");
        Ok(())
    }

    pub fn register_encoder(&self, encoder: Box<dyn Encoder>) {
        self.shared.encoders.lock().register(encoder);
    }

    pub fn register_recorder(&self, recorder: Box<dyn Recorder>) -> Result<()> {
        let _control = self.shared.control.lock();
        if self.shared.recording_or_closing() {
            return Err(StreamError::Busy);
        }
        self.shared.record.lock().recorders.register(recorder);
        Ok(())
    }

    pub fn encoder_names(&self) -> Vec<String> {
        let encoders = self.shared.encoders.lock();
        encoders.names().into_iter().map(String::from).collect()
    }

    pub fn recorder_names(&self) -> Vec<String> {
        let record = self.shared.record.lock();
        record.recorders.names().into_iter().map(String::from).collect()
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::SeqCst)
    }

    /// Recording and not closing
    pub fn is_recording(&self) -> bool {
        self.shared.record_state.load().is_on() && !self.shared.closing.load(Ordering::SeqCst)
    }

    /// Streaming or recording, including a recording that is still closing
    pub fn is_busy(&self) -> bool {
        self.is_streaming() || self.shared.recording_or_closing()
    }

    pub fn stream_state(&self) -> StreamState {
        if self.is_streaming() {
            StreamState::Streaming
        } else {
            StreamState::Idle
        }
    }

    pub fn record_state(&self) -> RecordState {
        self.shared.record_state.load()
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    pub fn current_fps(&self) -> FpsReadout {
        self.shared.fps.load()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Frames waiting for the worker
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        let shared = &self.shared;

        if shared.recording_or_closing() {
            let drain = Duration::from_millis(shared.pipeline.shutdown_drain_ms);
            if !shared.queue.wait_for_empty_timeout(drain) {
                warn!(pending = shared.queue.len(), "Shutting down with unwritten frames");
            }
        }
        shared.finish_recording(true);

        if shared.streaming.swap(false, Ordering::SeqCst) {
            let _ = shared.stop_capture();
        }

        shared.terminate.store(true, Ordering::SeqCst);
        shared.queue.abort();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Stream worker panicked");
            }
        }
    }
}

impl Shared {
    fn submit_frame(&self, buffer: &[u8], timestamp: u64) -> FrameDisposition {
        self.stats.submitted();

        if self.closing.load(Ordering::SeqCst) {
            self.finish_recording(false);
            return FrameDisposition::Closed;
        }

        let divisor = self.stream_opts.load().divisor as u64;
        let (fast_rolled, delta) = {
            let mut meters = self.meters.lock();
            meters.divisor_count += 1;
            if divisor > 1 && meters.divisor_count % divisor == 0 {
                drop(meters);
                self.stats.decimated();
                return FrameDisposition::Decimated;
            }

            let average_rolled = meters.average.on_frame();
            let fast_rolled = meters.fast.on_frame();
            if average_rolled || fast_rolled {
                let mut readout = self.fps.load();
                if average_rolled {
                    readout.average = meters.average.frames_per_second();
                }
                if fast_rolled {
                    readout.instant = meters.fast.frames_per_second();
                }
                self.fps.store(readout);
            }
            (fast_rolled, meters.fast.delta_time())
        };
        if fast_rolled {
            self.publish_fps();
        }

        let recording = self.record_state.load().is_on() && !self.closing.load(Ordering::SeqCst);
        if !recording && !self.streaming.load(Ordering::SeqCst) {
            self.stats.discarded();
            return FrameDisposition::Discarded;
        }

        let limit_mb = self.limits.load().max_buffer_mb;
        let allocated_mb = buffer.len() * self.queue.len() / (1024 * 1024);
        if allocated_mb > limit_mb {
            self.warn_buffer_full(allocated_mb, limit_mb);
            return FrameDisposition::Dropped;
        }

        let data = Bytes::copy_from_slice(buffer);
        // Counting and enqueueing under one lock so only one producer can
        // take the last recorded slot.
        let reached = {
            let mut meters = self.meters.lock();
            let record = recording && !self.completing.load(Ordering::SeqCst);
            if !record && !self.streaming.load(Ordering::SeqCst) {
                drop(meters);
                self.stats.discarded();
                return FrameDisposition::Discarded;
            }

            let mut reached = false;
            if record {
                meters.recorder.on_frame();
                reached = self
                    .record_state
                    .load()
                    .limit_reached(meters.recorder.total_frames(), meters.recorder.total_time());
                if reached {
                    self.completing.store(true, Ordering::SeqCst);
                }
            }
            self.queue.push(Frame::new(data, delta, timestamp).with_record(record));
            reached
        };
        self.stats.queued();

        if reached {
            info!("Waiting for all buffered frames to be recorded");
            self.queue.wait_for_empty();
            if self.completing.load(Ordering::SeqCst) {
                self.closing.store(true, Ordering::SeqCst);
                self.finish_recording(false);
            }
        }
        FrameDisposition::Queued
    }

    /// Close the recorder and leave the recording state.
    ///
    /// Without `force` this only acts when a recording is on or closing. The
    /// state and the closing flag change together under the record lock, and
    /// the state turns `Off` before `closing` clears, so concurrent callers
    /// close once and no reader sees an open recording in between.
    pub(crate) fn finish_recording(&self, force: bool) -> bool {
        let (was_on, was_closing, result) = {
            let mut record = self.record.lock();
            let was_on = record.state.is_on();
            let was_closing = self.closing.load(Ordering::SeqCst);
            if !force && !was_closing && !was_on {
                return false;
            }
            record.state = RecordState::Off;
            self.record_state.store(RecordState::Off);
            self.closing.store(false, Ordering::SeqCst);
            self.completing.store(false, Ordering::SeqCst);
            (was_on, was_closing, record.recorders.current_mut().close())
        };

        if let Err(e) = result {
            error!("Failed to close the record file: {e}");
        }
        if !was_on && !was_closing {
            return false;
        }

        if !self.streaming.load(Ordering::SeqCst) {
            let _ = self.stop_capture();
        }

        let (frames, elapsed_ms) = {
            let meters = self.meters.lock();
            (meters.recorder.total_frames(), meters.recorder.total_time())
        };
        info!(frames, elapsed_ms, "Record finished");
        self.observer.recording_changed(RecordState::Off);
        true
    }

    pub(crate) fn recording_or_closing(&self) -> bool {
        self.record_state.load().is_on() || self.closing.load(Ordering::SeqCst)
    }

    fn start_capture(&self) -> Result<()> {
        if self.capture_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.device.start() {
            self.capture_running.store(false, Ordering::SeqCst);
            return Err(match e {
                StreamError::CaptureStartFailed(_) => e,
                other => StreamError::CaptureStartFailed(other.to_string()),
            });
        }
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        if !self.capture_running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.device.stop().map_err(|e| {
            error!("Failed to stop capture: {e}");
            match e {
                StreamError::CaptureStopFailed(_) => e,
                other => StreamError::CaptureStopFailed(other.to_string()),
            }
        })
    }

    /// Device geometry with the negotiated pixel layout applied
    pub(crate) fn source_geometry(&self) -> FrameGeometry {
        let mut source = self.device.source_geometry();
        if let Some((format, depth)) = self.layout.lock().format {
            source.pixel_format = format;
            source.pixel_depth = depth;
        }
        source
    }

    fn pixel_layout(&self) -> (PixelFormat, u8) {
        let source = self.source_geometry();
        (source.pixel_format, source.pixel_depth)
    }

    /// Push a new destination size into every strategy and publish it.
    pub(crate) fn apply_stream_frame(&self, frame: FrameGeometry) {
        for encoder in self.encoders.lock().iter_mut() {
            encoder.set_size(frame.w, frame.h);
        }
        for recorder in self.record.lock().recorders.iter_mut() {
            recorder.set_size(frame.w, frame.h);
        }
        self.observer.stream_frame_changed(frame);
    }

    fn update_stream_opts(&self, f: impl FnOnce(&mut StreamOptions)) {
        let mut opts = (**self.stream_opts.load()).clone();
        f(&mut opts);
        self.stream_opts.store(Arc::new(opts));
    }

    fn update_record_opts(&self, f: impl FnOnce(&mut RecordOptions)) {
        let mut opts = (**self.record_opts.load()).clone();
        f(&mut opts);
        self.record_opts.store(Arc::new(opts));
    }

    /// Best effort; a publish still running swallows this one.
    fn publish_fps(&self) {
        if self
            .fast_publish
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let observer = self.observer.clone();
        let guard = self.fast_publish.clone();
        let readout = self.fps.load();
        let spawned = thread::Builder::new()
            .name("fps-publish".into())
            .spawn(move || {
                observer.fps_changed(readout);
                guard.store(false, Ordering::Release);
            });
        if spawned.is_err() {
            self.fast_publish.store(false, Ordering::Release);
        }
    }

    fn warn_buffer_full(&self, allocated_mb: usize, limit_mb: usize) {
        let dropped = self.stats.dropped();
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_drop_warn_ms.load(Ordering::Relaxed);

        if dropped > 1 && now_ms.saturating_sub(last) < DROP_WARN_INTERVAL_MS {
            return;
        }
        if self
            .last_drop_warn_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            let err = StreamError::BufferLimitExceeded {
                allocated_mb,
                limit_mb,
            };
            warn!(dropped, "{err}, skipping frame");
        }
    }
}

fn preview_window_ms(max_preview_fps: f64) -> f64 {
    1000.0 / max_preview_fps.max(PREVIEW_WINDOW_MIN_FPS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticCamera;

    fn manager() -> StreamManager {
        let camera = Arc::new(SyntheticCamera::new(16, 8, 8, 30.0));
        StreamManager::builder(camera).build().unwrap()
    }

    #[test]
    fn test_initial_state() {
        let manager = manager();
        assert_eq!(manager.stream_state(), StreamState::Idle);
        assert_eq!(manager.record_state(), RecordState::Off);
        assert!(!manager.is_busy());
        assert_eq!(manager.current_fps(), FpsReadout::default());
    }

    #[test]
    fn test_unknown_encoder_in_config() {
        let camera = Arc::new(SyntheticCamera::new(16, 8, 8, 30.0));
        let mut config = Config::default();
        config.stream.encoder = "H264".into();
        let err = StreamManager::builder(camera).config(config).build().err();
        assert!(matches!(err, Some(StreamError::UnknownEncoder(_))));
    }

    #[test]
    fn test_stream_frame_is_clamped() {
        let manager = manager();
        let frame = manager.set_stream_frame(10, 2, 100, 100).unwrap();
        assert_eq!((frame.x, frame.y, frame.w, frame.h), (10, 2, 6, 6));
        assert_eq!(manager.stream_frame(), Some(frame));

        manager.reset_stream_frame();
        assert_eq!(manager.stream_frame(), None);
    }

    #[test]
    fn test_destination_size_resets_origin() {
        let manager = manager();
        manager.set_stream_frame(4, 2, 8, 4).unwrap();
        manager.set_destination_size(16, 8);
        let frame = manager.stream_frame().unwrap();
        assert_eq!((frame.x, frame.y, frame.w, frame.h), (0, 0, 16, 8));
    }

    #[test]
    fn test_record_file_rejects_slash() {
        let manager = manager();
        let err = manager.set_record_file("/tmp", "a/b").unwrap_err();
        assert!(matches!(err, StreamError::InvalidFileName(_)));
        manager.set_record_file("/tmp", "clip__T_").unwrap();
        assert_eq!(manager.record_options().file_name, "clip__T_");
    }

    #[test]
    fn test_target_fps() {
        let manager = manager();
        manager.set_target_exposure(0.04);
        assert!((manager.target_fps() - 25.0).abs() < 1e-9);
        manager.set_target_exposure(0.0);
        assert_eq!(manager.target_fps(), 0.0);
    }

    #[test]
    fn test_pixel_format_negotiation() {
        let manager = manager();
        manager.select_encoder("MJPEG").unwrap();
        let support = manager.set_pixel_format(PixelFormat::Bgr, 8);
        assert!(!support.encoder);
        let support = manager.set_pixel_format(PixelFormat::Mono, 8);
        assert!(support.encoder);
        assert!(support.recorder);
    }

    #[test]
    fn test_select_unknown() {
        let manager = manager();
        assert!(matches!(
            manager.select_encoder("nope"),
            Err(StreamError::UnknownEncoder(_))
        ));
        assert!(matches!(
            manager.select_recorder("nope"),
            Err(StreamError::UnknownRecorder(_))
        ));
        assert!(manager.encoder_names().contains(&"MJPEG".to_string()));
    }

    #[test]
    fn test_divisor_decimates() {
        let manager = manager();
        manager.set_frame_divisor(3);
        let frame = vec![0u8; 16 * 8];
        let decimated = (0..9)
            .map(|i| manager.submit_frame(&frame, i))
            .filter(|d| *d == FrameDisposition::Decimated)
            .count();
        assert_eq!(decimated, 3);
    }
}
