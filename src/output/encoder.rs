//! Preview encoders

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::capture::frame::PixelFormat;
use crate::error::{Result, StreamError};
use crate::output::registry::Strategy;
use crate::output::sink::{PreviewBlob, PreviewSink};

/// Turns preview frames into blobs for the live-view sink.
///
/// Frames reaching `upload` are already cropped to the stream rectangle and
/// downscaled to at most 8 bits per component.
pub trait Encoder: Strategy {
    fn upload(&mut self, sink: &dyn PreviewSink, frame: &[u8], compressed: bool) -> Result<()>;
}

/// Sends frames unchanged
#[derive(Debug, Default)]
pub struct RawEncoder {
    width: u32,
    height: u32,
}

impl RawEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RawEncoder {
    fn name(&self) -> &str {
        "RAW"
    }

    fn set_pixel_format(&mut self, _format: PixelFormat, _depth: u8) -> bool {
        true
    }

    fn set_size(&mut self, width: u32, height: u32) -> bool {
        self.width = width;
        self.height = height;
        true
    }
}

impl Encoder for RawEncoder {
    fn upload(&mut self, sink: &dyn PreviewSink, frame: &[u8], compressed: bool) -> Result<()> {
        let format = if compressed { ".stream.z" } else { ".stream" };
        sink.send(PreviewBlob {
            data: Bytes::copy_from_slice(frame),
            format: format.into(),
            width: self.width,
            height: self.height,
        })
    }
}

/// Motion-JPEG: every preview frame becomes a standalone JPEG image
#[derive(Debug)]
pub struct MjpegEncoder {
    width: u32,
    height: u32,
    color: ExtendedColorType,
    quality: u8,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            width: 0,
            height: 0,
            color: ExtendedColorType::L8,
            quality: quality.clamp(1, 100),
        }
    }

    fn components(&self) -> usize {
        match self.color {
            ExtendedColorType::Rgb8 => 3,
            _ => 1,
        }
    }
}

impl Default for MjpegEncoder {
    fn default() -> Self {
        Self::new(85)
    }
}

impl Strategy for MjpegEncoder {
    fn name(&self) -> &str {
        "MJPEG"
    }

    fn set_pixel_format(&mut self, format: PixelFormat, _depth: u8) -> bool {
        match format {
            PixelFormat::Mono
            | PixelFormat::BayerRggb
            | PixelFormat::BayerGrbg
            | PixelFormat::BayerGbrg
            | PixelFormat::BayerBggr => {
                self.color = ExtendedColorType::L8;
                true
            }
            PixelFormat::Rgb => {
                self.color = ExtendedColorType::Rgb8;
                true
            }
            PixelFormat::Bgr | PixelFormat::Jpeg => false,
        }
    }

    fn set_size(&mut self, width: u32, height: u32) -> bool {
        self.width = width;
        self.height = height;
        true
    }
}

impl Encoder for MjpegEncoder {
    fn upload(&mut self, sink: &dyn PreviewSink, frame: &[u8], compressed: bool) -> Result<()> {
        if compressed {
            return Err(StreamError::Encoder("MJPEG can not re-encode compressed frames".into()));
        }

        let expected = self.width as usize * self.height as usize * self.components();
        if expected == 0 || frame.len() < expected {
            return Err(StreamError::Encoder(format!(
                "frame of {} bytes does not match {}x{}",
                frame.len(),
                self.width,
                self.height
            )));
        }

        let mut jpeg = Vec::with_capacity(expected / 4);
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        encoder
            .encode(&frame[..expected], self.width, self.height, self.color)
            .map_err(|e| StreamError::Encoder(e.to_string()))?;

        sink.send(PreviewBlob {
            data: Bytes::from(jpeg),
            format: ".stream_jpg".into(),
            width: self.width,
            height: self.height,
        })
    }
}
