//! The decode front end.
//!
//! [`JpegCodec`] parses the header once, exposes the stream's metadata, and
//! runs decode sessions over the hybrid block reader. Streams whose full
//! frame qualifies for the optimized path are made fully resident up front,
//! so repeated sessions never depend on the source being rewindable.

use std::io::{Cursor, Read};
use std::sync::Arc;

use tessera_blit::postproc::{PostProcessor, PqMode, probe_blitter};
use tessera_core::format::{ColorType, EncodedColor, Orientation, Resolution};
use tessera_core::geometry::Rect;
use tessera_core::metrics::DecodeMetrics;
use tracing::{debug, warn};

use crate::DecodeError;
use crate::markers::{HeaderInfo, parse_header};
use crate::metadata;
use crate::scale;
use crate::session::{JpegSource, ScanlineSource};
use crate::stream::FrontBufferedReader;
use crate::tiles::{HybridReader, ReaderConfig};
use crate::tunables::DecodeTunables;
use crate::yuv::{self, YuvLayout};

/// Output rows requested from the reader per iteration.
const BLOCK_ROWS: usize = 64;

/// Per-session request.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub color: ColorType,
    /// Requested output dimensions; `None` decodes at full size. Must be a
    /// supported scale or an exact sampling of the full frame, see
    /// [`JpegCodec::supports_dimensions`].
    pub dims: Option<(u32, u32)>,
    /// Subregion to produce, in output coordinates.
    pub region: Option<Rect>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            color: ColorType::Rgba8888,
            dims: None,
            region: None,
        }
    }
}

enum Payload<R> {
    Streaming(FrontBufferedReader<R>),
    Resident(Vec<u8>),
}

/// How a requested output size is realized.
struct DecodePlan {
    /// Scale hint passed to the backend, when decoding below full size.
    target_hint: Option<(u32, u32)>,
    /// Uniform sampling period applied on top of the backend output.
    sample: u32,
    /// Final output dimensions before any region restriction.
    out_dims: (u32, u32),
}

/// A JPEG decoder bound to one stream.
///
/// # Example
/// ```rust,no_run
/// use std::fs::File;
/// use tessera_jpeg::prelude::*;
///
/// let file = File::open("photo.jpg")?;
/// let mut codec = JpegCodec::from_stream(file, DecodeTunables::default())?;
/// let (w, h) = codec.scaled_dimensions(0.5);
/// let opts = DecodeOptions { dims: Some((w, h)), ..Default::default() };
/// let mut pixels = vec![0u8; (w * h * 4) as usize];
/// let rows = codec.decode(&opts, &mut pixels, (w * 4) as usize)?;
/// assert_eq!(rows as u32, h);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct JpegCodec<R> {
    payload: Payload<R>,
    header: HeaderInfo,
    resolution: Resolution,
    orientation: Orientation,
    icc: Option<Vec<u8>>,
    iso: Option<u32>,
    tunables: DecodeTunables,
    blitter: Option<Arc<dyn PostProcessor>>,
    metrics: Arc<DecodeMetrics>,
}

impl<R: Read> JpegCodec<R> {
    /// Parse the stream header and extract its metadata.
    ///
    /// When the full frame qualifies for the optimized path under the
    /// tunables, the whole bitstream is read into memory here so later
    /// sessions are rewind-free.
    pub fn from_stream(reader: R, tunables: DecodeTunables) -> Result<Self, DecodeError> {
        let tunables = tunables.sanitized();
        let mut front = FrontBufferedReader::new(reader);
        let mut buf = Vec::new();
        let header = loop {
            let mut chunk = [0u8; 8192];
            let n = front
                .read(&mut chunk)
                .map_err(|e| DecodeError::InternalError(e.to_string()))?;
            buf.extend_from_slice(&chunk[..n]);
            match parse_header(&buf) {
                Ok(header) => break header,
                Err(DecodeError::IncompleteInput { .. }) if n > 0 => continue,
                Err(e) => return Err(e),
            }
        };
        let resolution = Resolution::new(header.width, header.height)
            .ok_or_else(|| DecodeError::InvalidInput("zero frame dimension".into()))?;
        let orientation = metadata::orientation_from_markers(&header.app1);
        let icc = metadata::icc_profile_from_markers(&header.app2);
        let iso = metadata::scan_iso_speed(&header.app1);

        // Large frames take the resident route so the bitstream can be
        // walked more than once without a rewindable source. Streams whose
        // header already outran the retained prefix have no other option.
        // `buf` holds everything consumed so far, so draining the remainder
        // completes the bitstream. A failed load on a rewindable stream
        // rolls back to the streaming path.
        let payload = if tunables.qualifies(header.width, header.height)
            || !front.can_rewind()
        {
            match front.drain_to_end(&mut buf) {
                Ok(_) => {
                    debug!(bytes = buf.len(), "bitstream made resident");
                    Payload::Resident(buf)
                }
                Err(e) if front.can_rewind() => {
                    warn!(error = %e, "resident load failed, staying streaming");
                    Payload::Streaming(front)
                }
                Err(e) => return Err(DecodeError::InternalError(e.to_string())),
            }
        } else {
            Payload::Streaming(front)
        };

        Ok(Self {
            payload,
            header,
            resolution,
            orientation,
            icc,
            iso,
            tunables,
            blitter: probe_blitter(),
            metrics: Arc::new(DecodeMetrics::default()),
        })
    }

    /// Replace the post-processor discovered at construction.
    pub fn set_blitter(&mut self, blitter: Option<Arc<dyn PostProcessor>>) {
        self.blitter = blitter;
    }

    pub fn dimensions(&self) -> Resolution {
        self.resolution
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn encoded_color(&self) -> EncodedColor {
        self.header.encoded_color
    }

    /// Reassembled ICC profile, when the stream carried a complete one.
    pub fn icc_profile(&self) -> Option<&[u8]> {
        self.icc.as_deref()
    }

    /// ISO speed rating from the EXIF sub-IFD.
    pub fn iso_speed(&self) -> Option<u32> {
        self.iso
    }

    pub fn metrics(&self) -> &Arc<DecodeMetrics> {
        &self.metrics
    }

    /// Output dimensions the codec will actually produce for a desired
    /// fractional scale.
    pub fn scaled_dimensions(&self, desired: f32) -> (u32, u32) {
        let eighth = scale::eighth_for_scale(desired);
        let num = scale::native_numerator(eighth);
        scale::scaled_dims(
            self.resolution.width.get(),
            self.resolution.height.get(),
            num,
        )
    }

    /// Whether a decode at exactly `width` x `height` is possible.
    pub fn supports_dimensions(&self, width: u32, height: u32) -> bool {
        self.plan(Some((width, height))).is_ok()
    }

    /// Planar layout the stream would decode to, for callers that consume
    /// YUV directly.
    pub fn query_yuv_layout(&self) -> Result<YuvLayout, DecodeError> {
        yuv::query_yuv_layout(&self.header)
    }

    /// Planar readout of the decoded frame.
    ///
    /// The scanline backend only exposes interleaved output, so this always
    /// fails; callers are expected to probe [`Self::query_yuv_layout`] first
    /// and fall back to an interleaved decode.
    pub fn read_yuv_planes(
        &mut self,
        _layout: &YuvLayout,
        _planes: [&mut [u8]; 3],
    ) -> Result<(), DecodeError> {
        Err(DecodeError::Unimplemented("planar readout".into()))
    }

    fn plan(&self, dims: Option<(u32, u32)>) -> Result<DecodePlan, DecodeError> {
        let full = (self.resolution.width.get(), self.resolution.height.get());
        let out = dims.unwrap_or(full);
        if out == full {
            return Ok(DecodePlan { target_hint: None, sample: 1, out_dims: out });
        }
        if let Some(num) = scale::numerator_for_dims(full, out)
            && scale::native_numerator(num) == num
        {
            return Ok(DecodePlan {
                target_hint: Some(out),
                sample: 1,
                out_dims: out,
            });
        }
        if let Some(sample) = scale::sample_for_dims(full, out) {
            return Ok(DecodePlan { target_hint: None, sample, out_dims: out });
        }
        Err(DecodeError::InvalidInput(format!(
            "no decode path from {}x{} to {}x{}",
            full.0, full.1, out.0, out.1
        )))
    }

    /// Whether this image wants the perceptual-quality stage when the
    /// override leaves the decision to the image.
    fn image_wants_pq(&self) -> bool {
        self.header.encoded_color != EncodedColor::Gray
    }

    /// Run one decode session into `dst`.
    ///
    /// Rows are written every `dst_row_bytes`; the number of rows produced
    /// is returned. With a region request, output covers the region only
    /// and is clamped at the image edge.
    pub fn decode(
        &mut self,
        opts: &DecodeOptions,
        dst: &mut [u8],
        dst_row_bytes: usize,
    ) -> Result<usize, DecodeError> {
        let plan = self.plan(opts.dims)?;
        let (out_w, out_h) = plan.out_dims;
        let surface = match opts.region {
            Some(r) => {
                if r.is_empty() || r.right() > out_w || r.bottom() > out_h {
                    return Err(DecodeError::InvalidInput(format!(
                        "region {r} outside output {out_w}x{out_h}"
                    )));
                }
                (r.width, r.height)
            }
            None => (out_w, out_h),
        };
        if dst_row_bytes < opts.color.min_row_bytes(surface.0) {
            return Err(DecodeError::InvalidInput("row stride too small".into()));
        }
        if dst.len() < surface.1 as usize * dst_row_bytes {
            return Err(DecodeError::InvalidInput("destination too small".into()));
        }

        let pq = if self.tunables.pq_override.resolve(self.image_wants_pq()) {
            PqMode::Enabled
        } else {
            PqMode::Disabled
        };
        let config = SessionParams {
            color: opts.color,
            region: opts.region,
            sample: plan.sample,
            pq,
            iso: self.iso.unwrap_or(0),
            hw_allowed: pq == PqMode::Enabled
                && self.tunables.qualifies(surface.0, surface.1),
        };
        match &mut self.payload {
            Payload::Resident(data) => run_session(
                Cursor::new(&data[..]),
                &plan,
                &config,
                self.blitter.clone(),
                self.metrics.clone(),
                dst,
                dst_row_bytes,
            ),
            Payload::Streaming(front) => {
                front.rewind()?;
                run_session(
                    &mut *front,
                    &plan,
                    &config,
                    self.blitter.clone(),
                    self.metrics.clone(),
                    dst,
                    dst_row_bytes,
                )
            }
        }
    }
}

struct SessionParams {
    color: ColorType,
    region: Option<Rect>,
    sample: u32,
    pq: PqMode,
    iso: u32,
    hw_allowed: bool,
}

fn run_session<Rd: Read>(
    reader: Rd,
    plan: &DecodePlan,
    params: &SessionParams,
    blitter: Option<Arc<dyn PostProcessor>>,
    metrics: Arc<DecodeMetrics>,
    dst: &mut [u8],
    dst_row_bytes: usize,
) -> Result<usize, DecodeError> {
    let mut source = JpegSource::new(reader, plan.target_hint)?;
    let (dec_w, dec_h) = source.output_dims();
    let sample = params.sample;

    // Map the output-space region into decode-space rows and columns.
    let (dx, dy, dw, dh) = match params.region {
        Some(r) => {
            let dx = r.x * sample;
            let dy = r.y * sample;
            if dx >= dec_w || dy >= dec_h {
                return Err(DecodeError::InvalidInput("region outside frame".into()));
            }
            (
                dx,
                dy,
                (r.width * sample).min(dec_w - dx),
                (r.height * sample).min(dec_h - dy),
            )
        }
        None => (0, 0, dec_w, dec_h),
    };

    let mut subset_x = 0;
    if dx != 0 || dw != dec_w {
        let (honored_x, _) = source.crop(dx, dw)?;
        subset_x = dx - honored_x;
    }
    source.start()?;
    if dy > 0 {
        source.skip_scanlines(dy as usize)?;
    }

    let mut reader = HybridReader::new(
        source,
        subset_x,
        dw,
        ReaderConfig {
            color: params.color,
            sample: sample as usize,
            region_rows: dh as usize,
            pq: params.pq,
            iso: params.iso,
            hw_allowed: params.hw_allowed,
        },
        blitter,
        metrics,
    )?;

    let mut total = 0usize;
    loop {
        let n = reader.read_block(dst, total * dst_row_bytes, dst_row_bytes, BLOCK_ROWS)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    debug!(rows = total, hw = reader.used_hardware(), "session complete");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FixtureOptions, build_jpeg, exif_app1, icc_app2};
    use crate::tunables::PqOverride;
    use tessera_blit::heap::ShareHeap;
    use tessera_blit::postproc::LoopbackBlitter;

    fn codec_for(
        data: Vec<u8>,
        tunables: DecodeTunables,
    ) -> JpegCodec<Cursor<Vec<u8>>> {
        JpegCodec::from_stream(Cursor::new(data), tunables).unwrap()
    }

    #[test]
    fn metadata_surface() {
        let data = build_jpeg(&FixtureOptions::gray(24, 16).with_segments(vec![
            exif_app1(6, Some(200)),
            icc_app2(2, 2, b"tail"),
            icc_app2(1, 2, b"head-"),
        ]));
        let codec = codec_for(data, DecodeTunables::default());
        assert_eq!(codec.dimensions(), Resolution::new(24, 16).unwrap());
        assert_eq!(codec.orientation(), Orientation::RightTop);
        assert_eq!(codec.iso_speed(), Some(200));
        assert_eq!(codec.icc_profile().unwrap(), b"head-tail");
        assert_eq!(codec.encoded_color(), EncodedColor::Gray);
    }

    #[test]
    fn full_decode_to_rgba() {
        let data = build_jpeg(&FixtureOptions::gray(16, 16));
        let mut codec = codec_for(data, DecodeTunables::default());
        let mut dst = vec![0u8; 16 * 16 * 4];
        let rows = codec
            .decode(&DecodeOptions::default(), &mut dst, 16 * 4)
            .unwrap();
        assert_eq!(rows, 16);
        assert!(dst.chunks_exact(4).all(|px| px == [128, 128, 128, 255].as_slice()));
    }

    #[test]
    fn color_decode_to_rgb565() {
        let data = build_jpeg(&FixtureOptions::color(8, 8));
        let mut codec = codec_for(data, DecodeTunables::default());
        let opts = DecodeOptions { color: ColorType::Rgb565, ..Default::default() };
        let mut dst = vec![0u8; 8 * 8 * 2];
        assert_eq!(codec.decode(&opts, &mut dst, 16).unwrap(), 8);
        let expected = (((128u16 >> 3) << 11) | ((128 >> 2) << 5) | (128 >> 3)).to_le_bytes();
        assert!(dst.chunks_exact(2).all(|px| px == expected.as_slice()));
    }

    #[test]
    fn scaled_decode_at_half() {
        let data = build_jpeg(&FixtureOptions::gray(64, 64));
        let mut codec = codec_for(data, DecodeTunables::default());
        assert_eq!(codec.scaled_dimensions(0.5), (32, 32));
        assert_eq!(codec.scaled_dimensions(0.3), (16, 16));
        // 5/8 is not a native scale, so the request rounds up to full size.
        assert_eq!(codec.scaled_dimensions(0.6), (64, 64));
        assert_eq!(codec.scaled_dimensions(1.0), (64, 64));
        let opts = DecodeOptions {
            dims: Some((32, 32)),
            color: ColorType::Gray8,
            ..Default::default()
        };
        let mut dst = vec![0u8; 32 * 32];
        assert_eq!(codec.decode(&opts, &mut dst, 32).unwrap(), 32);
        assert!(dst.iter().all(|&b| b == 128));
    }

    #[test]
    fn sampled_decode_for_off_grid_dims() {
        let data = build_jpeg(&FixtureOptions::gray(24, 24));
        let mut codec = codec_for(data, DecodeTunables::default());
        assert!(codec.supports_dimensions(8, 8));
        assert!(!codec.supports_dimensions(7, 11));
        let opts = DecodeOptions {
            dims: Some((8, 8)),
            color: ColorType::Gray8,
            ..Default::default()
        };
        let mut dst = vec![0u8; 64];
        assert_eq!(codec.decode(&opts, &mut dst, 8).unwrap(), 8);
        assert!(dst.iter().all(|&b| b == 128));
    }

    #[test]
    fn region_decode_produces_region_rows() {
        let data = build_jpeg(&FixtureOptions::gray(32, 32));
        let mut codec = codec_for(data, DecodeTunables::default());
        let opts = DecodeOptions {
            color: ColorType::Gray8,
            region: Some(Rect::from_xywh(10, 4, 12, 8)),
            ..Default::default()
        };
        let mut dst = vec![0xEEu8; 12 * 8];
        assert_eq!(codec.decode(&opts, &mut dst, 12).unwrap(), 8);
        assert!(dst.iter().all(|&b| b == 128));
    }

    #[test]
    fn region_outside_output_rejected() {
        let data = build_jpeg(&FixtureOptions::gray(16, 16));
        let mut codec = codec_for(data, DecodeTunables::default());
        let opts = DecodeOptions {
            region: Some(Rect::from_xywh(8, 8, 16, 4)),
            ..Default::default()
        };
        let mut dst = vec![0u8; 16 * 4 * 4];
        assert!(matches!(
            codec.decode(&opts, &mut dst, 64),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn streaming_payload_decodes_twice() {
        let data = build_jpeg(&FixtureOptions::gray(16, 16));
        // Defaults keep a 16x16 frame off the resident path.
        let mut codec = codec_for(data, DecodeTunables::default());
        let mut dst = vec![0u8; 16 * 16 * 4];
        assert_eq!(codec.decode(&DecodeOptions::default(), &mut dst, 64).unwrap(), 16);
        dst.fill(0);
        assert_eq!(codec.decode(&DecodeOptions::default(), &mut dst, 64).unwrap(), 16);
        assert_eq!(&dst[..4], &[128, 128, 128, 255]);
    }

    #[test]
    fn qualifying_frame_goes_resident() {
        let tunables = DecodeTunables {
            min_opt_width: 1,
            min_opt_area: 1,
            ..Default::default()
        };
        let data = build_jpeg(&FixtureOptions::gray(16, 16));
        let mut codec = codec_for(data, tunables);
        assert!(matches!(codec.payload, Payload::Resident(_)));
        let mut dst = vec![0u8; 16 * 16 * 4];
        assert_eq!(codec.decode(&DecodeOptions::default(), &mut dst, 64).unwrap(), 16);
        dst.fill(0);
        assert_eq!(codec.decode(&DecodeOptions::default(), &mut dst, 64).unwrap(), 16);
    }

    #[test]
    fn hardware_path_engages_for_qualifying_decode() {
        if ShareHeap::probe() != ShareHeap::Memfd {
            return;
        }
        let tunables = DecodeTunables {
            min_opt_width: 1,
            min_opt_area: 1,
            pq_override: PqOverride::ForceOn,
            ..Default::default()
        };
        let data = build_jpeg(&FixtureOptions::gray(16, 16));
        let mut codec = codec_for(data, tunables);
        codec.set_blitter(Some(Arc::new(LoopbackBlitter)));
        let mut dst = vec![0u8; 16 * 16 * 4];
        assert_eq!(codec.decode(&DecodeOptions::default(), &mut dst, 64).unwrap(), 16);
        assert!(codec.metrics().hw_accepts() >= 1);
        assert_eq!(codec.metrics().hw_fallbacks(), 0);
        assert!(dst.chunks_exact(4).all(|px| px == [128, 128, 128, 255].as_slice()));
    }

    #[test]
    fn disabled_opt_never_attempts_hardware() {
        let tunables = DecodeTunables {
            opt_enabled: false,
            min_opt_width: 1,
            min_opt_area: 1,
            ..Default::default()
        };
        let data = build_jpeg(&FixtureOptions::gray(16, 16));
        let mut codec = codec_for(data, tunables);
        codec.set_blitter(Some(Arc::new(LoopbackBlitter)));
        let mut dst = vec![0u8; 16 * 16 * 4];
        codec.decode(&DecodeOptions::default(), &mut dst, 64).unwrap();
        assert_eq!(codec.metrics().hw_attempts(), 0);
    }

    #[test]
    fn pq_off_stays_on_software_path() {
        let tunables = DecodeTunables {
            min_opt_width: 1,
            min_opt_area: 1,
            pq_override: PqOverride::ForceOff,
            ..Default::default()
        };
        let data = build_jpeg(&FixtureOptions::color(16, 16));
        let mut codec = codec_for(data, tunables);
        codec.set_blitter(Some(Arc::new(LoopbackBlitter)));
        let mut dst = vec![0u8; 16 * 16 * 4];
        codec.decode(&DecodeOptions::default(), &mut dst, 64).unwrap();
        assert_eq!(codec.metrics().hw_attempts(), 0);
        assert!(dst.chunks_exact(4).all(|px| px == [128, 128, 128, 255].as_slice()));
    }

    #[test]
    fn yuv_query_and_readout() {
        let data = build_jpeg(&FixtureOptions::color(24, 16));
        let mut codec = codec_for(data, DecodeTunables::default());
        let layout = codec.query_yuv_layout().unwrap();
        assert_eq!(layout.y.width, 24);
        let mut y = vec![0u8; 24 * 16];
        let mut cb = vec![0u8; 24 * 16];
        let mut cr = vec![0u8; 24 * 16];
        assert!(matches!(
            codec.read_yuv_planes(&layout, [&mut y, &mut cb, &mut cr]),
            Err(DecodeError::Unimplemented(_))
        ));
        let gray = build_jpeg(&FixtureOptions::gray(8, 8));
        let codec = codec_for(gray, DecodeTunables::default());
        assert!(codec.query_yuv_layout().is_err());
    }

    /// Serves the fixture normally, then fails the first read past the end
    /// before settling into EOF.
    struct ErrorOnceAtEnd {
        inner: Cursor<Vec<u8>>,
        tripped: bool,
    }

    impl Read for ErrorOnceAtEnd {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            if n == 0 && !self.tripped {
                self.tripped = true;
                return Err(std::io::Error::other("transient read failure"));
            }
            Ok(n)
        }
    }

    #[test]
    fn failed_resident_load_rolls_back_to_streaming() {
        let tunables = DecodeTunables {
            min_opt_width: 1,
            min_opt_area: 1,
            ..Default::default()
        };
        let reader = ErrorOnceAtEnd {
            inner: Cursor::new(build_jpeg(&FixtureOptions::gray(16, 16))),
            tripped: false,
        };
        let mut codec = JpegCodec::from_stream(reader, tunables).unwrap();
        assert!(matches!(codec.payload, Payload::Streaming(_)));
        let mut dst = vec![0u8; 16 * 16 * 4];
        assert_eq!(codec.decode(&DecodeOptions::default(), &mut dst, 64).unwrap(), 16);
        assert!(dst.chunks_exact(4).all(|px| px == [128, 128, 128, 255].as_slice()));
    }

    #[test]
    fn garbage_stream_rejected() {
        let result = JpegCodec::from_stream(
            Cursor::new(b"not a jpeg at all".to_vec()),
            DecodeTunables::default(),
        );
        assert!(matches!(result.err(), Some(DecodeError::InvalidInput(_))));
    }

    #[test]
    fn truncated_header_reports_incomplete() {
        let mut data = build_jpeg(&FixtureOptions::gray(16, 16));
        data.truncate(12);
        let result = JpegCodec::from_stream(Cursor::new(data), DecodeTunables::default());
        assert!(matches!(
            result.err(),
            Some(DecodeError::IncompleteInput { .. })
        ));
    }
}
