//! Row swizzling.
//!
//! The scanline backend produces packed RGB, grayscale, or inverted-CMYK
//! rows. [`Swizzler`] converts one source row into the caller's output
//! color type, optionally restricted to a column subset and column-sampled
//! for decodes below the native scale.

use half::f16;
use tessera_core::format::ColorType;

use crate::DecodeError;

/// Pixel layout of rows coming out of the scanline backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Rgb24,
    Gray8,
    /// Inverted CMYK as produced for Adobe CMYK/YCCK streams.
    Cmyk32,
}

impl SourceFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            SourceFormat::Rgb24 => 3,
            SourceFormat::Gray8 => 1,
            SourceFormat::Cmyk32 => 4,
        }
    }
}

/// Converts backend rows to output rows.
///
/// Construction fixes the source subset (`subset_x`, `subset_width`, in
/// source pixels) and the column sampling period. Sampling picks every
/// `sample_x`-th pixel starting from `sample_x / 2`, so the samples sit
/// near the center of each period.
pub struct Swizzler {
    src: SourceFormat,
    dst: ColorType,
    subset_x: usize,
    subset_width: usize,
    sample_x: usize,
    dst_width: usize,
}

impl Swizzler {
    pub fn new(
        src: SourceFormat,
        dst: ColorType,
        subset_x: u32,
        subset_width: u32,
        sample_x: u32,
    ) -> Result<Self, DecodeError> {
        if subset_width == 0 || sample_x == 0 {
            return Err(DecodeError::InvalidInput("empty swizzle subset".into()));
        }
        if dst == ColorType::Gray8 && src != SourceFormat::Gray8 {
            return Err(DecodeError::Unimplemented(
                "gray output from color source".into(),
            ));
        }
        let sample_x = sample_x as usize;
        let start = sample_x / 2;
        let dst_width = (subset_width as usize)
            .saturating_sub(start)
            .div_ceil(sample_x)
            .max(1);
        Ok(Self {
            src,
            dst,
            subset_x: subset_x as usize,
            subset_width: subset_width as usize,
            sample_x,
            dst_width,
        })
    }

    /// Output pixels produced per row.
    pub fn dst_width(&self) -> usize {
        self.dst_width
    }

    pub fn dst_row_bytes(&self) -> usize {
        self.dst_width * self.dst.bytes_per_pixel()
    }

    /// Convert one source row. `src_row` must cover at least the subset;
    /// `dst_row` must hold [`Self::dst_row_bytes`] bytes.
    pub fn swizzle_row(&self, src_row: &[u8], dst_row: &mut [u8]) {
        let bpp = self.src.bytes_per_pixel();
        let start = self.subset_x + self.sample_x / 2;
        debug_assert!(src_row.len() >= (self.subset_x + self.subset_width) * bpp);
        debug_assert!(dst_row.len() >= self.dst_row_bytes());

        let mut out = 0usize;
        for i in 0..self.dst_width {
            let px = (start + i * self.sample_x) * bpp;
            let (r, g, b) = match self.src {
                SourceFormat::Rgb24 => {
                    (src_row[px], src_row[px + 1], src_row[px + 2])
                }
                SourceFormat::Gray8 => {
                    let g = src_row[px];
                    (g, g, g)
                }
                SourceFormat::Cmyk32 => {
                    let k = src_row[px + 3] as u16;
                    (
                        (src_row[px] as u16 * k / 255) as u8,
                        (src_row[px + 1] as u16 * k / 255) as u8,
                        (src_row[px + 2] as u16 * k / 255) as u8,
                    )
                }
            };
            match self.dst {
                ColorType::Rgba8888 => {
                    dst_row[out..out + 4].copy_from_slice(&[r, g, b, 0xFF]);
                    out += 4;
                }
                ColorType::Bgra8888 => {
                    dst_row[out..out + 4].copy_from_slice(&[b, g, r, 0xFF]);
                    out += 4;
                }
                ColorType::Rgb565 => {
                    let packed = ((r as u16 >> 3) << 11)
                        | ((g as u16 >> 2) << 5)
                        | (b as u16 >> 3);
                    dst_row[out..out + 2].copy_from_slice(&packed.to_le_bytes());
                    out += 2;
                }
                ColorType::Gray8 => {
                    dst_row[out] = r;
                    out += 1;
                }
                ColorType::RgbaF16 => {
                    for channel in [r, g, b, 0xFF] {
                        let h = f16::from_f32(channel as f32 / 255.0);
                        dst_row[out..out + 2]
                            .copy_from_slice(&h.to_bits().to_le_bytes());
                        out += 2;
                    }
                }
            }
        }
    }
}
