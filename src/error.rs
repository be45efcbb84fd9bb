//! Error types for the streaming and recording pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug)]
pub enum StreamError {
    /// The capture device refused to start; the pipeline stays in its previous state.
    #[error("Failed to start capture: {0}")]
    CaptureStartFailed(String),

    /// The capture device refused to stop. Local state is still updated.
    #[error("Failed to stop capture: {0}")]
    CaptureStopFailed(String),

    #[error("Can not open record file {}: {reason}", path.display())]
    RecorderOpenFailed { path: PathBuf, reason: String },

    #[error("Recording failed: {0}")]
    RecorderWriteFailed(String),

    /// A conflicting start was requested while a recording is active.
    #[error("Recording device is busy")]
    Busy,

    #[error("Frame buffer is full ({allocated_mb} MB allocated, limit {limit_mb} MB)")]
    BufferLimitExceeded { allocated_mb: usize, limit_mb: usize },

    #[error("Unknown encoder: {0}")]
    UnknownEncoder(String),

    #[error("Unknown recorder: {0}")]
    UnknownRecorder(String),

    #[error("Invalid record file name '{0}': directory separator not allowed")]
    InvalidFileName(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
