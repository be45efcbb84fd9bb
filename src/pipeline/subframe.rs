//! Cropping a frame to the stream rectangle

use crate::capture::frame::FrameGeometry;

/// Copy the `dst` rectangle out of a `src` frame, line by line.
///
/// `out` is resized to the crop size so a geometry change never reuses a
/// stale-sized buffer. Returns `false` without touching `out` when the crop
/// does not fit inside `src` or the source buffer is too short.
pub fn subframe(src: &[u8], src_geom: &FrameGeometry, out: &mut Vec<u8>, dst: &FrameGeometry) -> bool {
    if dst.x + dst.w > src_geom.w || dst.y + dst.h > src_geom.h {
        return false;
    }

    let bpp = src_geom.bytes_per_pixel();
    let src_stride = src_geom.line_size();
    let dst_stride = dst.w as usize * bpp;
    let src_offset = bpp * (dst.y as usize * src_geom.w as usize + dst.x as usize);

    if dst.h > 0 && src_offset + (dst.h as usize - 1) * src_stride + dst_stride > src.len() {
        return false;
    }

    out.resize(dst_stride * dst.h as usize, 0);

    for (row, line) in out.chunks_exact_mut(dst_stride.max(1)).enumerate().take(dst.h as usize) {
        let start = src_offset + row * src_stride;
        line.copy_from_slice(&src[start..start + dst_stride]);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelFormat;

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_full_frame_is_identity() {
        let geom = FrameGeometry::new(16, 9, PixelFormat::Mono, 16);
        let src = ramp(geom.total_size());
        let mut out = Vec::new();

        assert!(subframe(&src, &geom, &mut out, &geom));
        assert_eq!(out, src);
    }

    #[test]
    fn test_crop_rgb() {
        let src_geom = FrameGeometry::new(4, 3, PixelFormat::Rgb, 8);
        let src = ramp(src_geom.total_size());
        let dst = FrameGeometry {
            x: 1,
            y: 1,
            w: 2,
            h: 2,
            ..src_geom
        };
        let mut out = Vec::new();

        assert!(subframe(&src, &src_geom, &mut out, &dst));
        assert_eq!(out.len(), 2 * 2 * 3);
        // row 1, col 1 starts at (1 * 4 + 1) * 3 = 15
        assert_eq!(&out[..6], &src[15..21]);
        // row 2, col 1 starts at (2 * 4 + 1) * 3 = 27
        assert_eq!(&out[6..], &src[27..33]);
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let src_geom = FrameGeometry::new(4, 4, PixelFormat::Mono, 8);
        let src = ramp(src_geom.total_size());
        let dst = FrameGeometry {
            x: 3,
            y: 0,
            w: 2,
            h: 1,
            ..src_geom
        };
        let mut out = vec![9u8; 3];
        assert!(!subframe(&src, &src_geom, &mut out, &dst));
        assert_eq!(out, vec![9u8; 3]);

        assert!(!subframe(&src[..4], &src_geom, &mut out, &FrameGeometry { x: 0, y: 2, w: 2, h: 2, ..src_geom }));
    }

    #[test]
    fn test_buffer_reallocated_on_size_change() {
        let src_geom = FrameGeometry::new(8, 8, PixelFormat::Mono, 8);
        let src = ramp(src_geom.total_size());
        let mut out = Vec::new();

        subframe(&src, &src_geom, &mut out, &FrameGeometry { x: 0, y: 0, w: 4, h: 4, ..src_geom });
        assert_eq!(out.len(), 16);
        subframe(&src, &src_geom, &mut out, &FrameGeometry { x: 0, y: 0, w: 2, h: 2, ..src_geom });
        assert_eq!(out.len(), 4);
    }
}
