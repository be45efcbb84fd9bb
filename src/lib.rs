pub mod capture;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Capture, Frame, FrameGeometry, PixelFormat, SyntheticCamera};
pub use error::{Result, StreamError};
pub use output::{ChannelSink, PreviewBlob, PreviewSink};
pub use pipeline::{
    FormatSupport, FpsReadout, FrameDisposition, RecordMode, RecordState, StatsSnapshot,
    StreamManager, StreamObserver, StreamState,
};

/// Stream manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: Limits,
    pub stream: StreamOptions,
    pub record: RecordOptions,
    pub pipeline: PipelineConfig,
}

/// Resource limits consulted on every frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Queued frame memory above which new frames are dropped
    pub max_buffer_mb: usize,
    pub max_preview_fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Exposure the driver should use while streaming
    pub exposure_secs: f64,
    /// Drop every Nth frame when greater than 1
    pub divisor: u32,
    pub encoder: String,
    pub fast_window_ms: f64,
    pub average_window_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordOptions {
    /// Directory template, may contain `_D_`, `_H_`, `_T_` and `_F_`
    pub directory: String,
    /// File name template, same tokens as `directory`
    pub file_name: String,
    pub duration_secs: f64,
    pub frame_total: u64,
    pub recorder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pin the frame worker to this core
    pub worker_core: Option<usize>,
    /// Close a pending recording after this long without frames
    pub close_watchdog_ms: u64,
    /// How long shutdown waits for queued frames to be written
    pub shutdown_drain_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_mb: 512,
            max_preview_fps: 10.0,
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            exposure_secs: 0.1,
            divisor: 1,
            encoder: "RAW".into(),
            fast_window_ms: if cfg!(target_arch = "arm") { 500.0 } else { 100.0 },
            average_window_ms: 1000.0,
        }
    }
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            directory: utils::default_record_dir(),
            file_name: format!("record{}", utils::TOKEN_TIMESTAMP),
            duration_secs: 1.0,
            frame_total: 30,
            recorder: "RAW".into(),
        }
    }
}

impl RecordOptions {
    /// Record for the configured duration
    pub fn duration_mode(&self) -> RecordMode {
        RecordMode::Duration(Duration::from_secs_f64(self.duration_secs.max(0.0)))
    }

    /// Record the configured number of frames
    pub fn frame_count_mode(&self) -> RecordMode {
        RecordMode::FrameCount(self.frame_total)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_core: None,
            close_watchdog_ms: 2000,
            shutdown_drain_ms: 5000,
        }
    }
}

impl Config {
    /// Defaults, overridden by an optional TOML file, overridden by
    /// `FRAMESTREAM__<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                ::config::Environment::with_prefix("FRAMESTREAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.limits.max_buffer_mb, 512);
        assert_eq!(config.limits.max_preview_fps, 10.0);
        assert_eq!(config.stream.divisor, 1);
        assert_eq!(config.record.frame_total, 30);
        assert!(config.record.directory.ends_with("framestream_D_"));
        assert_eq!(config.record.frame_count_mode(), RecordMode::FrameCount(30));
        assert_eq!(
            config.record.duration_mode(),
            RecordMode::Duration(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[limits]\nmax_buffer_mb = 64\n\n[record]\nframe_total = 100\nrecorder = \"RAW\""
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.limits.max_buffer_mb, 64);
        assert_eq!(config.limits.max_preview_fps, 10.0);
        assert_eq!(config.record.frame_total, 100);
        assert_eq!(config.stream.encoder, "RAW");
    }
}
