use std::os::fd::RawFd;
use std::sync::Arc;

use tessera_core::prelude::{ColorType, Rect};
use tracing::debug;

use crate::BlitError;

/// Three-way picture-quality enablement carried with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PqMode {
    Enabled,
    Disabled,
}

/// Scenario tag the service uses to pick a tuning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Still-picture decode.
    Picture,
}

/// One synchronous post-process request.
///
/// The response is success/failure only; on success the caller reads the
/// payload back from the destination buffer.
#[derive(Debug)]
pub struct BlitRequest {
    /// Source buffer fd, already flushed by the caller.
    pub src_fd: RawFd,
    pub src_rect: Rect,
    pub src_stride: usize,
    pub src_size: usize,
    /// Destination buffer fd.
    pub dst_fd: RawFd,
    pub dst_rect: Rect,
    pub dst_stride: usize,
    pub dst_size: usize,
    /// Pixel layout of both buffers.
    pub color: ColorType,
    pub pq: PqMode,
    pub scenario: Scenario,
    /// ISO speed rating extracted from the image, zero when absent.
    pub iso: u32,
}

/// Driver contract for the hardware post-processor.
///
/// A single blocking request/response; implementations must not retry
/// internally. The caller owns both buffers for the full duration of the
/// call and may reuse them immediately after it returns.
pub trait PostProcessor: Send + Sync {
    fn blit(&self, request: &BlitRequest) -> Result<(), BlitError>;
}

/// Locate the platform post-processing service.
///
/// There is no in-tree hardware backend; embedders with a real service
/// inject their own [`PostProcessor`] instead.
pub fn probe_blitter() -> Option<Arc<dyn PostProcessor>> {
    None
}

/// Reference implementation of the driver contract that maps both fds and
/// copies the source rectangle. Used for bring-up and tests; applies no
/// picture-quality processing.
#[derive(Debug, Default)]
pub struct LoopbackBlitter;

impl PostProcessor for LoopbackBlitter {
    fn blit(&self, request: &BlitRequest) -> Result<(), BlitError> {
        // The hardware path only accepts the layouts the blit engine
        // understands; everything else falls back to software.
        if !matches!(request.color, ColorType::Rgba8888 | ColorType::Rgb565) {
            return Err(BlitError::Rejected(format!(
                "unsupported layout {}",
                request.color
            )));
        }
        if request.src_fd < 0 || request.dst_fd < 0 {
            return Err(BlitError::Rejected("buffer fd missing".into()));
        }
        if request.src_rect.is_empty() || request.src_rect != request.dst_rect {
            return Err(BlitError::Rejected(format!(
                "geometry mismatch {} -> {}",
                request.src_rect, request.dst_rect
            )));
        }

        let src = Mapping::map(request.src_fd, request.src_size, libc::PROT_READ)?;
        let dst = Mapping::map(
            request.dst_fd,
            request.dst_size,
            libc::PROT_READ | libc::PROT_WRITE,
        )?;

        let bpp = request.color.bytes_per_pixel();
        let row = request.src_rect.width as usize * bpp;
        for y in 0..request.src_rect.height as usize {
            let s = y * request.src_stride;
            let d = y * request.dst_stride;
            if s + row > request.src_size || d + row > request.dst_size {
                return Err(BlitError::Rejected("rect exceeds buffer".into()));
            }
            dst.as_mut_slice()[d..d + row].copy_from_slice(&src.as_slice()[s..s + row]);
        }
        debug!(
            rect = %request.src_rect,
            iso = request.iso,
            "loopback blit complete"
        );
        Ok(())
    }
}

/// Scoped mmap over a caller-provided fd.
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn map(fd: RawFd, len: usize, prot: libc::c_int) -> Result<Self, BlitError> {
        if len == 0 {
            return Err(BlitError::Rejected("empty buffer".into()));
        }
        // SAFETY: shared mapping over an fd the caller guarantees is live and
        // at least `len` bytes for the duration of the blit.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(BlitError::Rejected(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: [ptr, ptr+len) is mapped for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[allow(clippy::mut_from_ref)]
    fn as_mut_slice(&self) -> &mut [u8] {
        // SAFETY: mappings are created per-blit and never aliased; the
        // destination mapping is only written through this accessor.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by Mapping::map and not yet freed.
        unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
    }
}
