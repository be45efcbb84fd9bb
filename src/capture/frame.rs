use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A captured frame, owned by exactly one pipeline stage at a time.
///
/// The payload is immutable once submitted; `Bytes` lets the preview task keep
/// the buffer alive after the worker moved on without copying it again.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,

    /// Milliseconds since the previous accepted frame
    pub capture_time: f64,

    /// Absolute timestamp supplied by the driver
    pub timestamp: u64,

    /// Counted against the active recording and written by the recorder
    pub record: bool,
}

impl Frame {
    pub fn new(data: Bytes, capture_time: f64, timestamp: u64) -> Self {
        Self {
            data,
            capture_time,
            timestamp,
            record: false,
        }
    }

    pub fn with_record(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Pixel formats produced by drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    Mono,
    BayerRggb,
    BayerGrbg,
    BayerGbrg,
    BayerBggr,
    Rgb,
    Bgr,
    /// Already compressed by the device; never cropped or downscaled
    Jpeg,
}

impl PixelFormat {
    pub fn components(self) -> usize {
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
            _ => 1,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }
}

/// Rectangle plus pixel layout of a frame.
///
/// Used both for the layout reported by the device (source) and for the crop
/// the stream should deliver (destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub pixel_format: PixelFormat,
    pub pixel_depth: u8,
}

impl FrameGeometry {
    pub fn new(w: u32, h: u32, pixel_format: PixelFormat, pixel_depth: u8) -> Self {
        Self {
            x: 0,
            y: 0,
            w,
            h,
            pixel_format,
            pixel_depth,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        let bytes_per_component = (self.pixel_depth as usize + 7) / 8;
        self.pixel_format.components() * bytes_per_component
    }

    pub fn pixels(&self) -> usize {
        self.w as usize * self.h as usize
    }

    pub fn line_size(&self) -> usize {
        self.w as usize * self.bytes_per_pixel()
    }

    pub fn total_size(&self) -> usize {
        self.line_size() * self.h as usize
    }

    /// Same rectangle, ignoring the pixel layout fields
    pub fn same_rect(&self, other: &FrameGeometry) -> bool {
        self.x == other.x && self.y == other.y && self.w == other.w && self.h == other.h
    }

    /// Clamp this rectangle so it lies within `source`.
    ///
    /// The origin is pulled inside the source first, then the size is cut to
    /// what remains. Pixel layout is taken from the source.
    pub fn clamped_to(&self, source: &FrameGeometry) -> FrameGeometry {
        let x = self.x.min(source.w.saturating_sub(1));
        let y = self.y.min(source.h.saturating_sub(1));
        let w = self.w.min(source.w.saturating_sub(x));
        let h = self.h.min(source.h.saturating_sub(y));

        FrameGeometry {
            x,
            y,
            w,
            h,
            pixel_format: source.pixel_format,
            pixel_depth: source.pixel_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let mono16 = FrameGeometry::new(640, 480, PixelFormat::Mono, 16);
        assert_eq!(mono16.bytes_per_pixel(), 2);
        assert_eq!(mono16.line_size(), 1280);
        assert_eq!(mono16.total_size(), 640 * 480 * 2);

        let rgb8 = FrameGeometry::new(10, 10, PixelFormat::Rgb, 8);
        assert_eq!(rgb8.bytes_per_pixel(), 3);
        assert_eq!(rgb8.pixels(), 100);

        let mono12 = FrameGeometry::new(4, 4, PixelFormat::Mono, 12);
        assert_eq!(mono12.bytes_per_pixel(), 2);
    }

    #[test]
    fn test_clamp_inside_source() {
        let source = FrameGeometry::new(100, 80, PixelFormat::Mono, 8);
        let wanted = FrameGeometry {
            x: 90,
            y: 70,
            w: 50,
            h: 50,
            ..source
        };

        let clamped = wanted.clamped_to(&source);
        assert_eq!((clamped.x, clamped.y, clamped.w, clamped.h), (90, 70, 10, 10));

        let outside = FrameGeometry {
            x: 500,
            y: 500,
            w: 10,
            h: 10,
            ..source
        };
        let clamped = outside.clamped_to(&source);
        assert_eq!((clamped.x, clamped.y, clamped.w, clamped.h), (99, 79, 1, 1));
    }

    #[test]
    fn test_clamp_keeps_valid_rect() {
        let source = FrameGeometry::new(100, 80, PixelFormat::Rgb, 8);
        let crop = FrameGeometry {
            x: 10,
            y: 20,
            w: 30,
            h: 40,
            ..source
        };
        assert_eq!(crop.clamped_to(&source), crop);
    }
}
