//! Recording strategies

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::capture::frame::PixelFormat;
use crate::error::{Result, StreamError};
use crate::output::registry::Strategy;

/// Persists frames to a file.
///
/// All calls are serialized by the stream manager's record lock.
pub trait Recorder: Strategy {
    /// File extension including the dot
    fn extension(&self) -> &str;

    fn set_fps(&mut self, _fps: f64) {}

    fn set_stream_enabled(&mut self, _enabled: bool) {}

    fn open(&mut self, path: &Path) -> Result<()>;

    fn write_frame(&mut self, frame: &[u8], timestamp: u64) -> Result<()>;

    /// Finish the file. Closing a recorder that is not open is not an error.
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Appends every frame's bytes to a `.raw` file, nothing else.
#[derive(Debug, Default)]
pub struct RawRecorder {
    file: Option<File>,
    path: Option<PathBuf>,
    width: u32,
    height: u32,
    format: PixelFormat,
    depth: u8,
    fps: f64,
    frames: u64,
    bytes: u64,
}

impl RawRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Strategy for RawRecorder {
    fn name(&self) -> &str {
        "RAW"
    }

    fn set_pixel_format(&mut self, format: PixelFormat, depth: u8) -> bool {
        self.format = format;
        self.depth = depth;
        true
    }

    fn set_size(&mut self, width: u32, height: u32) -> bool {
        self.width = width;
        self.height = height;
        true
    }
}

impl Recorder for RawRecorder {
    fn extension(&self) -> &str {
        ".raw"
    }

    fn set_fps(&mut self, fps: f64) {
        self.fps = fps;
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        if self.file.is_some() {
            warn!(previous = ?self.path, "Recorder still open, closing previous file");
            self.close()?;
        }

        let file = File::create(path).map_err(|e| StreamError::RecorderOpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        self.file = Some(file);
        self.path = Some(path.to_path_buf());
        self.frames = 0;
        self.bytes = 0;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8], _timestamp: u64) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StreamError::RecorderWriteFailed("recorder is not open".into()))?;

        file.write_all(frame)
            .map_err(|e| StreamError::RecorderWriteFailed(e.to_string()))?;
        self.frames += 1;
        self.bytes += frame.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };

        file.flush()?;
        info!(
            path = ?self.path,
            frames = self.frames,
            bytes = self.bytes,
            width = self.width,
            height = self.height,
            format = ?self.format,
            depth = self.depth,
            fps = self.fps,
            "Raw recording closed"
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.raw");
        let mut recorder = RawRecorder::new();

        recorder.open(&path).unwrap();
        assert!(recorder.is_open());
        recorder.write_frame(&[1, 2, 3], 0).unwrap();
        recorder.write_frame(&[4, 5], 1).unwrap();
        recorder.close().unwrap();

        assert!(!recorder.is_open());
        assert_eq!(recorder.frames_written(), 2);
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);

        // Closing twice is harmless
        recorder.close().unwrap();
    }

    #[test]
    fn test_write_without_open_fails() {
        let mut recorder = RawRecorder::new();
        assert!(matches!(
            recorder.write_frame(&[0], 0),
            Err(StreamError::RecorderWriteFailed(_))
        ));
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = RawRecorder::new();
        let err = recorder.open(&dir.path().join("missing/clip.raw")).unwrap_err();
        assert!(matches!(err, StreamError::RecorderOpenFailed { .. }));
    }
}
