//! Scanline sources.
//!
//! [`ScanlineSource`] is the seam between the block reader and whatever
//! produces decoded rows. The production implementation wraps the
//! `jpeg-decoder` backend; tests drive the reader with synthetic sources.

use std::io::Read;

use tessera_core::format::Resolution;

use crate::DecodeError;
use crate::swizzle::SourceFormat;

/// A sequential producer of decoded rows at a fixed scale.
///
/// Call order: optionally [`crop`](ScanlineSource::crop), then
/// [`start`](ScanlineSource::start), then any mix of
/// [`read_scanline`](ScanlineSource::read_scanline) and
/// [`skip_scanlines`](ScanlineSource::skip_scanlines).
pub trait ScanlineSource {
    /// Output dimensions at the negotiated scale.
    fn output_dims(&self) -> (u32, u32);

    fn source_format(&self) -> SourceFormat;

    /// Restrict subsequent rows to a column range, in output pixels.
    ///
    /// The honored range may start left of `x` to satisfy block alignment;
    /// the honored `(x, width)` is returned and always covers the request.
    fn crop(&mut self, x: u32, width: u32) -> Result<(u32, u32), DecodeError>;

    fn start(&mut self) -> Result<(), DecodeError>;

    /// Produce the next row into `out`, which must hold `honored_width *
    /// bytes_per_pixel` bytes. `Ok(false)` means the source ran out of rows
    /// before the frame was complete.
    fn read_scanline(&mut self, out: &mut [u8]) -> Result<bool, DecodeError>;

    /// Discard `n` rows without producing them.
    fn skip_scanlines(&mut self, n: usize) -> Result<(), DecodeError>;
}

fn map_backend_error(err: jpeg_decoder::Error) -> DecodeError {
    use jpeg_decoder::Error;
    match err {
        Error::Format(msg) => DecodeError::InvalidInput(msg),
        Error::Unsupported(feature) => {
            DecodeError::Unimplemented(format!("{feature:?}"))
        }
        Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            DecodeError::incomplete()
        }
        Error::Io(e) => DecodeError::InternalError(e.to_string()),
        Error::Internal(e) => DecodeError::InternalError(e.to_string()),
    }
}

/// Map the backend's pixel format onto our row layout. 16-bit lossless
/// output has no consumer here.
fn map_pixel_format(
    format: jpeg_decoder::PixelFormat,
) -> Result<SourceFormat, DecodeError> {
    use jpeg_decoder::PixelFormat;
    match format {
        PixelFormat::L8 => Ok(SourceFormat::Gray8),
        PixelFormat::RGB24 => Ok(SourceFormat::Rgb24),
        PixelFormat::CMYK32 => Ok(SourceFormat::Cmyk32),
        PixelFormat::L16 => {
            Err(DecodeError::Unimplemented("16-bit luma output".into()))
        }
    }
}

/// [`ScanlineSource`] backed by `jpeg-decoder`.
///
/// The backend decodes the whole frame on [`start`](ScanlineSource::start);
/// rows are then served from the held frame. Cropping aligns the left edge
/// down to the 8-pixel block grid and serves the honored span out of each
/// full row.
pub struct JpegSource<R: Read> {
    decoder: jpeg_decoder::Decoder<R>,
    full_dims: (u32, u32),
    dims: (u32, u32),
    format: SourceFormat,
    /// Honored crop in output pixels, defaulting to the full row.
    crop_x: u32,
    crop_width: u32,
    frame: Option<Vec<u8>>,
    row: usize,
}

impl<R: Read> JpegSource<R> {
    /// Open a stream and negotiate the output scale.
    ///
    /// `target` is a hint in output pixels; the backend picks the smallest
    /// IDCT scale whose output covers it. Without a hint the source decodes
    /// at full size.
    pub fn new(reader: R, target: Option<(u32, u32)>) -> Result<Self, DecodeError> {
        let mut decoder = jpeg_decoder::Decoder::new(reader);
        decoder.read_info().map_err(map_backend_error)?;
        let info = decoder
            .info()
            .ok_or_else(|| DecodeError::InternalError("no frame info".into()))?;
        let format = map_pixel_format(info.pixel_format)?;
        // info() tracks the scaled output once scale() runs; the declared
        // frame size has to be captured first.
        let full_dims = (info.width as u32, info.height as u32);
        let dims = match target {
            Some((w, h)) => {
                let (sw, sh) = decoder
                    .scale(w.min(u16::MAX as u32) as u16, h.min(u16::MAX as u32) as u16)
                    .map_err(map_backend_error)?;
                (sw as u32, sh as u32)
            }
            None => (info.width as u32, info.height as u32),
        };
        let crop_width = dims.0;
        Ok(Self {
            decoder,
            full_dims,
            dims,
            format,
            crop_x: 0,
            crop_width,
            frame: None,
            row: 0,
        })
    }

    /// Full frame resolution as declared by the stream header, regardless
    /// of any negotiated scale.
    pub fn frame_resolution(&self) -> Option<Resolution> {
        Resolution::new(self.full_dims.0, self.full_dims.1)
    }

    fn full_row_bytes(&self) -> usize {
        self.dims.0 as usize * self.format.bytes_per_pixel()
    }

    pub fn honored_row_bytes(&self) -> usize {
        self.crop_width as usize * self.format.bytes_per_pixel()
    }
}

impl<R: Read> ScanlineSource for JpegSource<R> {
    fn output_dims(&self) -> (u32, u32) {
        self.dims
    }

    fn source_format(&self) -> SourceFormat {
        self.format
    }

    fn crop(&mut self, x: u32, width: u32) -> Result<(u32, u32), DecodeError> {
        if self.frame.is_some() {
            return Err(DecodeError::InternalError("crop after start".into()));
        }
        if width == 0 || x.checked_add(width).is_none_or(|r| r > self.dims.0) {
            return Err(DecodeError::InvalidInput(format!(
                "crop {x}+{width} outside width {}",
                self.dims.0
            )));
        }
        // Align the left edge down to the block grid; the right edge stays.
        let honored_x = x & !7;
        self.crop_x = honored_x;
        self.crop_width = width + (x - honored_x);
        Ok((self.crop_x, self.crop_width))
    }

    fn start(&mut self) -> Result<(), DecodeError> {
        let frame = self.decoder.decode().map_err(map_backend_error)?;
        if frame.len() < self.full_row_bytes() * self.dims.1 as usize {
            return Err(DecodeError::InternalError("short frame from backend".into()));
        }
        self.frame = Some(frame);
        self.row = 0;
        Ok(())
    }

    fn read_scanline(&mut self, out: &mut [u8]) -> Result<bool, DecodeError> {
        let frame = self
            .frame
            .as_ref()
            .ok_or_else(|| DecodeError::InternalError("read before start".into()))?;
        if self.row >= self.dims.1 as usize {
            return Ok(false);
        }
        let bpp = self.format.bytes_per_pixel();
        let row_start = self.row * self.full_row_bytes();
        let from = row_start + self.crop_x as usize * bpp;
        let len = self.honored_row_bytes();
        out[..len].copy_from_slice(&frame[from..from + len]);
        self.row += 1;
        Ok(true)
    }

    fn skip_scanlines(&mut self, n: usize) -> Result<(), DecodeError> {
        if self.frame.is_none() {
            return Err(DecodeError::InternalError("skip before start".into()));
        }
        self.row = (self.row + n).min(self.dims.1 as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FixtureOptions, build_jpeg};
    use std::io::Cursor;

    fn gray_source(w: u16, h: u16) -> JpegSource<Cursor<Vec<u8>>> {
        let data = build_jpeg(&FixtureOptions::gray(w, h));
        JpegSource::new(Cursor::new(data), None).unwrap()
    }

    #[test]
    fn serves_flat_gray_rows() {
        let mut src = gray_source(16, 8);
        assert_eq!(src.output_dims(), (16, 8));
        assert_eq!(src.source_format(), SourceFormat::Gray8);
        src.start().unwrap();
        let mut row = [0u8; 16];
        for _ in 0..8 {
            assert!(src.read_scanline(&mut row).unwrap());
            assert!(row.iter().all(|&b| b == 128));
        }
        assert!(!src.read_scanline(&mut row).unwrap());
    }

    #[test]
    fn color_stream_reports_rgb() {
        let data = build_jpeg(&FixtureOptions::color(8, 8));
        let mut src = JpegSource::new(Cursor::new(data), None).unwrap();
        assert_eq!(src.source_format(), SourceFormat::Rgb24);
        src.start().unwrap();
        let mut row = [0u8; 24];
        assert!(src.read_scanline(&mut row).unwrap());
        assert_eq!(&row[..3], &[128, 128, 128]);
    }

    #[test]
    fn crop_aligns_left_edge_down() {
        let mut src = gray_source(32, 8);
        let (x, w) = src.crop(10, 8).unwrap();
        assert_eq!((x, w), (8, 10));
        src.start().unwrap();
        let mut row = [0u8; 10];
        assert!(src.read_scanline(&mut row).unwrap());
    }

    #[test]
    fn crop_rejects_out_of_range() {
        let mut src = gray_source(16, 8);
        assert!(src.crop(8, 16).is_err());
        assert!(src.crop(0, 0).is_err());
    }

    #[test]
    fn skip_advances_rows() {
        let mut src = gray_source(8, 8);
        src.start().unwrap();
        src.skip_scanlines(6).unwrap();
        let mut row = [0u8; 8];
        assert!(src.read_scanline(&mut row).unwrap());
        assert!(src.read_scanline(&mut row).unwrap());
        assert!(!src.read_scanline(&mut row).unwrap());
    }

    #[test]
    fn scale_hint_negotiates_smaller_output() {
        let data = build_jpeg(&FixtureOptions::gray(64, 64));
        let src = JpegSource::new(Cursor::new(data), Some((16, 16))).unwrap();
        assert_eq!(src.output_dims(), (16, 16));
        assert_eq!(
            src.frame_resolution().unwrap(),
            Resolution::new(64, 64).unwrap()
        );
    }

    #[test]
    fn truncated_stream_fails_start() {
        let mut data = build_jpeg(&FixtureOptions::gray(8, 8));
        data.truncate(data.len() - 4);
        let mut src = JpegSource::new(Cursor::new(data), None).unwrap();
        assert!(src.start().is_err());
    }
}
