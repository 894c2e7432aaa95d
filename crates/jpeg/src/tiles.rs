//! Hybrid block reader.
//!
//! Output rows are produced in blocks. The first block decides whether the
//! session rides the hardware post-processor: decoded rows are swizzled
//! into a shared scratch buffer, flushed, and offered to the blitter. If
//! the blitter accepts, every following block goes the same way; any
//! rejection drops the session onto the pure software path for good, with
//! the already-decoded rows salvaged by sampling them in place.
//!
//! Sampled sessions work differently: sampled rows accumulate in the
//! scratch buffer across blocks, and the post-processor runs exactly once,
//! over the whole subsampled region, when the accumulated row count
//! reaches the sampled output height.

use std::os::fd::AsRawFd;
use std::sync::Arc;

use tessera_blit::heap::{ShareBuffer, ShareHeap};
use tessera_blit::postproc::{BlitRequest, PostProcessor, PqMode, Scenario};
use tessera_core::format::ColorType;
use tessera_core::geometry::Rect;
use tessera_core::metrics::DecodeMetrics;
use tracing::{debug, warn};

use crate::DecodeError;
use crate::session::ScanlineSource;
use crate::swizzle::Swizzler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    /// No block produced yet; the first one picks the path.
    Undecided,
    Hardware,
    /// Sampled rows gathering in scratch; the single post-process is
    /// still pending.
    SampleAccumulating,
    Software,
}

/// Per-session progress through the region.
#[derive(Debug, Clone, Copy)]
struct TileState {
    path: Path,
    /// Source rows consumed (read or skipped).
    rows_consumed: usize,
    /// Output rows emitted.
    rows_emitted: usize,
}

/// Fixed parameters of one read session.
pub struct ReaderConfig {
    pub color: ColorType,
    /// Uniform row/column sampling period; 1 means direct.
    pub sample: usize,
    /// Source rows in the region being read.
    pub region_rows: usize,
    pub pq: PqMode,
    /// ISO speed rating forwarded to the post-processor, zero when absent.
    pub iso: u32,
    /// Whether policy allows the hardware path at all.
    pub hw_allowed: bool,
}

pub struct HybridReader<S> {
    source: S,
    /// Full-width conversion feeding the scratch buffer.
    hw_swizzler: Swizzler,
    /// Sampled conversion feeding the caller's memory directly.
    sw_swizzler: Swizzler,
    blitter: Option<Arc<dyn PostProcessor>>,
    metrics: Arc<DecodeMetrics>,
    heap: ShareHeap,
    scratch: ShareBuffer,
    companion: ShareBuffer,
    config: ReaderConfig,
    state: TileState,
    row_buf: Vec<u8>,
}

impl<S: ScanlineSource> HybridReader<S> {
    /// Build a reader over a started-ready source.
    ///
    /// `subset_x` and `subset_width` are output pixels relative to the rows
    /// the source serves (i.e. already inside any honored crop).
    pub fn new(
        source: S,
        subset_x: u32,
        subset_width: u32,
        config: ReaderConfig,
        blitter: Option<Arc<dyn PostProcessor>>,
        metrics: Arc<DecodeMetrics>,
    ) -> Result<Self, DecodeError> {
        if config.sample == 0 || config.region_rows == 0 {
            return Err(DecodeError::InvalidInput("empty read region".into()));
        }
        let format = source.source_format();
        let hw_swizzler =
            Swizzler::new(format, config.color, subset_x, subset_width, 1)?;
        let sw_swizzler = Swizzler::new(
            format,
            config.color,
            subset_x,
            subset_width,
            config.sample as u32,
        )?;
        let heap = ShareHeap::probe();
        let row_bytes =
            source.output_dims().0 as usize * format.bytes_per_pixel();
        let mut scratch = ShareBuffer::new(heap);
        scratch.set_color(config.color);
        let mut companion = ShareBuffer::new(heap);
        companion.set_color(config.color);
        Ok(Self {
            source,
            hw_swizzler,
            sw_swizzler,
            blitter,
            metrics,
            heap,
            scratch,
            companion,
            config,
            state: TileState {
                path: Path::Undecided,
                rows_consumed: 0,
                rows_emitted: 0,
            },
            row_buf: vec![0u8; row_bytes],
        })
    }

    /// Total output rows this session will produce.
    pub fn output_rows(&self) -> usize {
        let start = self.config.sample / 2;
        self.config
            .region_rows
            .saturating_sub(start)
            .div_ceil(self.config.sample)
            .max(1)
    }

    /// Output bytes per row.
    pub fn output_row_bytes(&self) -> usize {
        self.sw_swizzler.dst_row_bytes()
    }

    pub fn rows_emitted(&self) -> usize {
        self.state.rows_emitted
    }

    /// Whether the session ended up on the hardware path.
    pub fn used_hardware(&self) -> bool {
        self.state.path == Path::Hardware
    }

    /// Produce up to `max_rows` output rows into `dst` starting at
    /// `dst_offset`, one row every `dst_row_bytes`. Returns the rows
    /// produced; zero means the region is complete.
    pub fn read_block(
        &mut self,
        dst: &mut [u8],
        dst_offset: usize,
        dst_row_bytes: usize,
        max_rows: usize,
    ) -> Result<usize, DecodeError> {
        if dst_row_bytes < self.output_row_bytes() {
            return Err(DecodeError::InvalidInput("row stride too small".into()));
        }
        let remaining = self.output_rows() - self.state.rows_emitted;
        let out_rows = max_rows.min(remaining);
        if out_rows == 0 {
            return Ok(0);
        }
        let needed = dst_offset + out_rows * dst_row_bytes;
        if dst.len() < needed {
            return Err(DecodeError::InvalidInput("destination too small".into()));
        }
        match self.state.path {
            Path::Software => {
                self.read_block_sw(dst, dst_offset, dst_row_bytes, out_rows)
            }
            Path::Undecided => {
                if !self.hw_eligible() {
                    self.state.path = Path::Software;
                    self.read_block_sw(dst, dst_offset, dst_row_bytes, out_rows)
                } else if self.config.sample > 1 {
                    self.state.path = Path::SampleAccumulating;
                    self.read_block_accum(dst, dst_offset, dst_row_bytes, out_rows)
                } else {
                    self.read_block_hw(dst, dst_offset, dst_row_bytes, out_rows)
                }
            }
            Path::SampleAccumulating => {
                self.read_block_accum(dst, dst_offset, dst_row_bytes, out_rows)
            }
            Path::Hardware => self.read_block_hw(dst, dst_offset, dst_row_bytes, out_rows),
        }
    }

    fn hw_eligible(&self) -> bool {
        self.config.hw_allowed && self.blitter.is_some() && self.heap.exports_fd()
    }

    fn read_block_hw(
        &mut self,
        dst: &mut [u8],
        dst_offset: usize,
        dst_row_bytes: usize,
        out_rows: usize,
    ) -> Result<usize, DecodeError> {
        let src_count =
            out_rows.min(self.config.region_rows - self.state.rows_consumed);
        let hw_row = self.hw_swizzler.dst_row_bytes();

        let before = self.scratch.capacity();
        self.scratch
            .ensure_capacity(src_count * hw_row)
            .map_err(|e| DecodeError::InternalError(e.to_string()))?;
        if self.scratch.capacity() != before {
            self.metrics.scratch_alloc();
        }

        // Decode the whole block into scratch at full width.
        for j in 0..src_count {
            let got = self.source.read_scanline(&mut self.row_buf)?;
            if !got {
                // Salvage the rows already in scratch, then report how far
                // the output got.
                let picked = self.salvage_from_scratch(
                    dst,
                    dst_offset,
                    dst_row_bytes,
                    j,
                );
                self.state.rows_consumed += j;
                self.state.rows_emitted += picked;
                self.state.path = Path::Software;
                return Err(DecodeError::IncompleteInput {
                    rows: self.state.rows_emitted,
                });
            }
            let scratch = self.scratch.as_mut_slice();
            self.hw_swizzler
                .swizzle_row(&self.row_buf, &mut scratch[j * hw_row..(j + 1) * hw_row]);
        }

        let hw_width = self.hw_swizzler.dst_width() as u32;
        let result = self.try_blit(hw_width, src_count, hw_row, out_rows);
        match result {
            Ok(()) => {
                self.metrics.hw_accept();
                self.state.path = Path::Hardware;
                let sw_row = self.output_row_bytes();
                for r in 0..out_rows {
                    let from = r * sw_row;
                    let to = dst_offset + r * dst_row_bytes;
                    dst[to..to + sw_row]
                        .copy_from_slice(&self.companion.as_slice()[from..from + sw_row]);
                }
                self.state.rows_consumed += src_count;
                self.state.rows_emitted += out_rows;
                debug!(rows = out_rows, "hardware block complete");
                Ok(out_rows)
            }
            Err(err) => {
                warn!(error = %err, "post-processor rejected block, \
                       falling back to software");
                self.metrics.hw_fallback();
                self.state.path = Path::Software;
                let picked = self.salvage_from_scratch(
                    dst,
                    dst_offset,
                    dst_row_bytes,
                    src_count,
                );
                self.state.rows_consumed += src_count;
                self.state.rows_emitted += picked;
                Ok(picked)
            }
        }
    }

    /// Sampled block on the hardware path. Each block is sampled straight
    /// into the destination and mirrored into scratch at the accumulated
    /// row offset; the post-processor runs once, over the whole subsampled
    /// region, when the last sampled row lands.
    fn read_block_accum(
        &mut self,
        dst: &mut [u8],
        dst_offset: usize,
        dst_row_bytes: usize,
        out_rows: usize,
    ) -> Result<usize, DecodeError> {
        let sw_row = self.output_row_bytes();
        let total = self.output_rows();

        let before = self.scratch.capacity();
        self.scratch
            .ensure_capacity(total * sw_row)
            .map_err(|e| DecodeError::InternalError(e.to_string()))?;
        if self.scratch.capacity() != before {
            self.metrics.scratch_alloc();
        }

        for r in 0..out_rows {
            let pick = self.config.sample / 2
                + self.state.rows_emitted * self.config.sample;
            let skip = pick - self.state.rows_consumed;
            if skip > 0 {
                self.source.skip_scanlines(skip)?;
                self.state.rows_consumed += skip;
            }
            let got = self.source.read_scanline(&mut self.row_buf)?;
            if !got {
                self.state.path = Path::Software;
                return Err(DecodeError::IncompleteInput {
                    rows: self.state.rows_emitted,
                });
            }
            self.state.rows_consumed += 1;
            let to = dst_offset + r * dst_row_bytes;
            self.sw_swizzler
                .swizzle_row(&self.row_buf, &mut dst[to..to + sw_row]);
            let at = self.state.rows_emitted * sw_row;
            self.scratch.as_mut_slice()[at..at + sw_row]
                .copy_from_slice(&dst[to..to + sw_row]);
            self.state.rows_emitted += 1;
        }

        if self.state.rows_emitted == total {
            let width = self.sw_swizzler.dst_width() as u32;
            match self.try_blit(width, total, sw_row, total) {
                Ok(()) => {
                    self.metrics.hw_accept();
                    self.state.path = Path::Hardware;
                    self.copy_back_region(dst, dst_offset, dst_row_bytes, out_rows);
                    debug!(rows = total, "accumulated region post-processed");
                }
                Err(err) => {
                    warn!(error = %err, "post-processor rejected accumulated \
                           region, keeping software rows");
                    self.metrics.hw_fallback();
                    self.state.path = Path::Software;
                }
            }
        }
        Ok(out_rows)
    }

    /// Replace the emitted rows with the post-processed copy. Rows from
    /// earlier blocks are reachable only when the caller kept a constant
    /// stride; otherwise only the current block is refreshed.
    fn copy_back_region(
        &self,
        dst: &mut [u8],
        dst_offset: usize,
        dst_row_bytes: usize,
        out_rows: usize,
    ) {
        let sw_row = self.output_row_bytes();
        let total = self.state.rows_emitted;
        let earlier = total - out_rows;
        let (base, first) = match dst_offset.checked_sub(earlier * dst_row_bytes) {
            Some(base) => (base, 0),
            None => (dst_offset, earlier),
        };
        for r in first..total {
            let from = r * sw_row;
            let to = base + (r - first) * dst_row_bytes;
            dst[to..to + sw_row]
                .copy_from_slice(&self.companion.as_slice()[from..from + sw_row]);
        }
    }

    fn try_blit(
        &mut self,
        src_width: u32,
        src_rows: usize,
        src_stride: usize,
        out_rows: usize,
    ) -> Result<(), tessera_blit::BlitError> {
        use tessera_blit::BlitError;
        let blitter = self
            .blitter
            .as_ref()
            .ok_or(BlitError::Unavailable)?
            .clone();
        self.metrics.hw_attempt();
        let sw_row = self.sw_swizzler.dst_row_bytes();
        self.companion.ensure_capacity(out_rows * sw_row)?;
        self.scratch.flush()?;
        let src_fd = self.scratch.fd().ok_or(BlitError::Unavailable)?;
        let dst_fd = self.companion.fd().ok_or(BlitError::Unavailable)?;
        let request = BlitRequest {
            src_fd: src_fd.as_raw_fd(),
            src_rect: Rect::from_xywh(0, 0, src_width, src_rows as u32),
            src_stride,
            src_size: self.scratch.capacity(),
            dst_fd: dst_fd.as_raw_fd(),
            dst_rect: Rect::from_xywh(
                0,
                0,
                self.sw_swizzler.dst_width() as u32,
                out_rows as u32,
            ),
            dst_stride: sw_row,
            dst_size: self.companion.capacity(),
            color: self.config.color,
            pq: self.config.pq,
            scenario: Scenario::Picture,
            iso: self.config.iso,
        };
        blitter.blit(&request)
    }

    /// Pick the sampled rows and columns out of the first `src_count`
    /// scratch rows and write them to the destination. Returns rows written.
    fn salvage_from_scratch(
        &mut self,
        dst: &mut [u8],
        dst_offset: usize,
        dst_row_bytes: usize,
        src_count: usize,
    ) -> usize {
        let sample = self.config.sample;
        let start = sample / 2;
        let bpp = self.config.color.bytes_per_pixel();
        let hw_row = self.hw_swizzler.dst_row_bytes();
        let dst_width = self.sw_swizzler.dst_width();
        let mut picked = 0usize;
        for j in 0..src_count {
            let g = self.state.rows_consumed + j;
            if g < start || (g - start) % sample != 0 {
                continue;
            }
            let row = &self.scratch.as_slice()[j * hw_row..(j + 1) * hw_row];
            let to = dst_offset + picked * dst_row_bytes;
            for i in 0..dst_width {
                let from = (start + i * sample) * bpp;
                dst[to + i * bpp..to + (i + 1) * bpp]
                    .copy_from_slice(&row[from..from + bpp]);
            }
            picked += 1;
        }
        picked
    }

    fn read_block_sw(
        &mut self,
        dst: &mut [u8],
        dst_offset: usize,
        dst_row_bytes: usize,
        out_rows: usize,
    ) -> Result<usize, DecodeError> {
        let sample = self.config.sample;
        let sw_row = self.output_row_bytes();
        for r in 0..out_rows {
            let pick = sample / 2 + self.state.rows_emitted * sample;
            let skip = pick - self.state.rows_consumed;
            if skip > 0 {
                self.source.skip_scanlines(skip)?;
                self.state.rows_consumed += skip;
            }
            let got = self.source.read_scanline(&mut self.row_buf)?;
            if !got {
                return Err(DecodeError::IncompleteInput {
                    rows: self.state.rows_emitted,
                });
            }
            self.state.rows_consumed += 1;
            let to = dst_offset + r * dst_row_bytes;
            self.sw_swizzler
                .swizzle_row(&self.row_buf, &mut dst[to..to + sw_row]);
            self.state.rows_emitted += 1;
        }
        Ok(out_rows)
    }
}
