//! 16-bit to 8-bit tone mapping for the preview path

use once_cell::sync::Lazy;

/// Shared sRGB table; building it costs 64k `powf` calls.
pub static SRGB_LUT: Lazy<GammaLut16> = Lazy::new(GammaLut16::srgb);

/// Precomputed gamma curve mapping every 16-bit sample to 8 bits.
pub struct GammaLut16 {
    table: Box<[u8]>,
}

impl GammaLut16 {
    /// Piecewise curve: linear segment `a * I` below `threshold`,
    /// `(1 + b) * I^(1/gamma) - b` above, with `I` normalised to `[0, 1]`.
    pub fn new(gamma: f64, a: f64, b: f64, threshold: f64) -> Self {
        let table = (0..=u16::MAX)
            .map(|i| {
                let intensity = i as f64 / u16::MAX as f64;
                let out = if intensity <= threshold {
                    a * intensity
                } else {
                    (1.0 + b) * intensity.powf(1.0 / gamma) - b
                };
                (out * 255.0).round().clamp(0.0, 255.0) as u8
            })
            .collect::<Vec<u8>>()
            .into_boxed_slice();

        Self { table }
    }

    pub fn srgb() -> Self {
        Self::new(2.4, 12.92, 0.055, 0.00304)
    }

    pub fn lookup(&self, sample: u16) -> u8 {
        self.table[sample as usize]
    }

    /// Map little-endian 16-bit samples from `src` into `dst`.
    ///
    /// Converts `min(src.len() / 2, dst.len())` samples.
    pub fn apply(&self, src: &[u8], dst: &mut [u8]) {
        for (out, sample) in dst.iter_mut().zip(src.chunks_exact(2)) {
            *out = self.table[u16::from_le_bytes([sample[0], sample[1]]) as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_and_monotonic() {
        let lut = &*SRGB_LUT;
        assert_eq!(lut.lookup(0), 0);
        assert_eq!(lut.lookup(u16::MAX), 255);

        let mut previous = 0;
        for i in (0..=u16::MAX).step_by(257) {
            let value = lut.lookup(i);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_gamma_brightens_midtones() {
        let lut = GammaLut16::srgb();
        assert!(lut.lookup(u16::MAX / 4) > 64);
    }

    #[test]
    fn test_apply_little_endian() {
        let lut = GammaLut16::srgb();
        let src = [0x00, 0x00, 0xff, 0xff, 0x00, 0x80];
        let mut dst = [0u8; 3];
        lut.apply(&src, &mut dst);
        assert_eq!(dst[0], 0);
        assert_eq!(dst[1], 255);
        assert_eq!(dst[2], lut.lookup(0x8000));
    }
}
