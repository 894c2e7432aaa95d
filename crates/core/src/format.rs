use std::{fmt, num::NonZeroU32};

/// Output pixel layout a caller can request from the decode pipeline.
///
/// # Example
/// ```rust
/// use tessera_core::prelude::ColorType;
///
/// assert_eq!(ColorType::Rgba8888.bytes_per_pixel(), 4);
/// assert_eq!(ColorType::Rgb565.bytes_per_pixel(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorType {
    /// 8-bit RGBA, the canonical layout for color-transform input.
    Rgba8888,
    /// 8-bit BGRA.
    Bgra8888,
    /// Packed 16-bit 5-6-5 RGB.
    Rgb565,
    /// Single 8-bit luminance channel.
    Gray8,
    /// Half-float RGBA.
    RgbaF16,
}

impl ColorType {
    /// Bytes per pixel for this layout.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            ColorType::Rgba8888 | ColorType::Bgra8888 => 4,
            ColorType::Rgb565 => 2,
            ColorType::Gray8 => 1,
            ColorType::RgbaF16 => 8,
        }
    }

    /// Minimum row stride, in bytes, for `width` pixels.
    pub const fn min_row_bytes(self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }
}

impl fmt::Display for ColorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorType::Rgba8888 => "RGBA8888",
            ColorType::Bgra8888 => "BGRA8888",
            ColorType::Rgb565 => "RGB565",
            ColorType::Gray8 => "GRAY8",
            ColorType::RgbaF16 => "RGBAF16",
        };
        write!(f, "{name}")
    }
}

/// Color model of the encoded bitstream, as declared by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EncodedColor {
    /// Three components, chroma-subsampled luma/chroma.
    Ycbcr,
    /// Single luminance component.
    Gray,
    /// Three components stored as plain RGB.
    Rgb,
    /// Four inverted CMYK components.
    Cmyk,
    /// Four components, YCbCr-transformed CMYK.
    Ycck,
}

impl EncodedColor {
    /// Whether decoding requires an extra CMYK format-conversion pass.
    pub const fn is_cmyk_family(self) -> bool {
        matches!(self, EncodedColor::Cmyk | EncodedColor::Ycck)
    }
}

/// Resolution of an image or decode target.
///
/// # Example
/// ```rust
/// use tessera_core::prelude::Resolution;
///
/// let res = Resolution::new(640, 480).unwrap();
/// assert_eq!(res.width.get(), 640);
/// assert!(Resolution::new(0, 480).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution, returning `None` if width or height are zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    /// Total pixel count.
    pub fn area(&self) -> u64 {
        self.width.get() as u64 * self.height.get() as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// EXIF orientation of the encoded image.
///
/// Values mirror the TIFF orientation tag (1 through 8); anything else maps
/// to the default [`Orientation::TopLeft`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Orientation {
    #[default]
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
    LeftTop,
    RightTop,
    RightBottom,
    LeftBottom,
}

impl Orientation {
    /// Map a raw TIFF orientation value; `None` for out-of-range values.
    pub const fn from_exif(value: u16) -> Option<Self> {
        Some(match value {
            1 => Orientation::TopLeft,
            2 => Orientation::TopRight,
            3 => Orientation::BottomRight,
            4 => Orientation::BottomLeft,
            5 => Orientation::LeftTop,
            6 => Orientation::RightTop,
            7 => Orientation::RightBottom,
            8 => Orientation::LeftBottom,
            _ => return None,
        })
    }

    /// Whether width and height swap when applying this orientation.
    pub const fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Orientation::LeftTop
                | Orientation::RightTop
                | Orientation::RightBottom
                | Orientation::LeftBottom
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_covers_exif_range() {
        for v in 1..=8u16 {
            assert!(Orientation::from_exif(v).is_some());
        }
        assert!(Orientation::from_exif(0).is_none());
        assert!(Orientation::from_exif(9).is_none());
    }

    #[test]
    fn rotated_orientations_swap_dimensions() {
        assert!(Orientation::RightTop.swaps_dimensions());
        assert!(!Orientation::BottomRight.swaps_dimensions());
    }

    #[test]
    fn row_bytes_match_layout() {
        assert_eq!(ColorType::RgbaF16.min_row_bytes(10), 80);
        assert_eq!(ColorType::Gray8.min_row_bytes(10), 10);
    }
}
