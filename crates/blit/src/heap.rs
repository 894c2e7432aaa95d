use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr;

use tessera_core::prelude::ColorType;

use crate::BlitError;

/// Alignment required by the hardware consumer.
const ALIGN: usize = 128;
/// Fixed slack appended for decoder lookahead past the declared size.
const LOOKAHEAD_SLACK: usize = 2048;

/// Round a requested size up to the aligned capacity actually reserved.
pub(crate) fn padded_capacity(size: usize) -> usize {
    ((size + ALIGN - 1) & !(ALIGN - 1)) + ALIGN + LOOKAHEAD_SLACK
}

/// Backend used for scratch allocations, probed once per session.
///
/// # Example
/// ```rust
/// use tessera_blit::prelude::*;
///
/// let heap = ShareHeap::probe();
/// let mut buf = ShareBuffer::new(heap);
/// buf.ensure_capacity(4096).unwrap();
/// assert!(buf.capacity() >= 4096);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareHeap {
    /// memfd-backed allocations; mapped for software and exportable as an fd.
    Memfd,
    /// Plain host memory; no fd, so hardware consumers cannot import it.
    Host,
}

impl ShareHeap {
    /// Pick the kernel-shared backend when the platform supports it.
    pub fn probe() -> Self {
        // SAFETY: memfd_create takes a NUL-terminated name and flags; the
        // returned fd (if any) is closed immediately.
        let fd = unsafe { libc::memfd_create(c"tessera-probe".as_ptr(), libc::MFD_CLOEXEC) };
        if fd >= 0 {
            // SAFETY: fd was just returned by memfd_create and is unused.
            unsafe { libc::close(fd) };
            ShareHeap::Memfd
        } else {
            ShareHeap::Host
        }
    }

    /// Whether allocations from this heap can hand an fd to hardware.
    pub fn exports_fd(&self) -> bool {
        matches!(self, ShareHeap::Memfd)
    }
}

enum Backing {
    Memfd {
        fd: OwnedFd,
        map: *mut u8,
        capacity: usize,
    },
    Host(Vec<u8>),
}

/// Scratch region usable by both the software decoder (mapped slice) and a
/// hardware consumer (file descriptor).
///
/// Allocated lazily on first [`ShareBuffer::ensure_capacity`]; regrown by
/// free+realloc when a larger size is requested and reused in place
/// otherwise (never shrunk, to avoid churn across scanline blocks).
/// Released exactly once on drop; dropping a never-allocated buffer is a
/// no-op.
pub struct ShareBuffer {
    heap: ShareHeap,
    backing: Option<Backing>,
    len: usize,
    color: ColorType,
}

impl ShareBuffer {
    /// Create an empty buffer on the given heap. No memory is reserved yet.
    pub fn new(heap: ShareHeap) -> Self {
        Self {
            heap,
            backing: None,
            len: 0,
            color: ColorType::Rgba8888,
        }
    }

    /// Record the pixel layout the hardware consumer should assume.
    pub fn set_color(&mut self, color: ColorType) {
        self.color = color;
    }

    /// Pixel layout associated with the buffer contents.
    pub fn color(&self) -> ColorType {
        self.color
    }

    /// Bytes currently declared in use.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes are declared in use.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reserved capacity in bytes (zero before the first allocation).
    pub fn capacity(&self) -> usize {
        match &self.backing {
            Some(Backing::Memfd { capacity, .. }) => *capacity,
            Some(Backing::Host(buf)) => buf.len(),
            None => 0,
        }
    }

    /// File descriptor for the hardware consumer, if the backing exports one.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        match &self.backing {
            Some(Backing::Memfd { fd, .. }) => Some(fd.as_fd()),
            _ => None,
        }
    }

    /// Grow to hold at least `size` bytes, reallocating only when the current
    /// capacity is insufficient. Contents are not preserved across a regrow.
    pub fn ensure_capacity(&mut self, size: usize) -> Result<(), BlitError> {
        if size <= self.capacity() && self.backing.is_some() {
            self.len = size;
            return Ok(());
        }
        let capacity = padded_capacity(size);
        self.release();
        self.backing = Some(match self.heap {
            ShareHeap::Memfd => alloc_memfd(capacity)?,
            ShareHeap::Host => Backing::Host(vec![0u8; capacity]),
        });
        self.len = size;
        Ok(())
    }

    /// Declared contents as a slice.
    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            // SAFETY: map points at `capacity >= len` bytes owned by this
            // buffer and mapped for the lifetime of the backing.
            Some(Backing::Memfd { map, .. }) => unsafe {
                std::slice::from_raw_parts(*map, self.len)
            },
            Some(Backing::Host(buf)) => &buf[..self.len],
            None => &[],
        }
    }

    /// Declared contents as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.backing {
            // SAFETY: exclusive borrow of self guarantees sole access to the
            // mapping.
            Some(Backing::Memfd { map, .. }) => unsafe {
                std::slice::from_raw_parts_mut(*map, self.len)
            },
            Some(Backing::Host(buf)) => &mut buf[..self.len],
            None => &mut [],
        }
    }

    /// Write back the full allocated range so a hardware consumer observes
    /// every byte written through the mapping. Must run before the fd is
    /// handed to the post-processor.
    pub fn flush(&self) -> Result<(), BlitError> {
        match &self.backing {
            Some(Backing::Memfd { map, capacity, .. }) => {
                // SAFETY: the range [map, map+capacity) is a live mapping
                // owned by this buffer.
                let rc = unsafe { libc::msync(*map as *mut libc::c_void, *capacity, libc::MS_SYNC) };
                if rc != 0 {
                    return Err(BlitError::Flush(last_os_error()));
                }
                Ok(())
            }
            // Host memory has no hardware consumer; nothing to sync.
            _ => Ok(()),
        }
    }

    fn release(&mut self) {
        if let Some(Backing::Memfd { map, capacity, fd }) = self.backing.take() {
            // SAFETY: map/capacity describe the mapping created in
            // alloc_memfd and not yet unmapped; fd closes on drop below.
            unsafe { libc::munmap(map as *mut libc::c_void, capacity) };
            drop(fd);
        }
        self.len = 0;
    }
}

impl Drop for ShareBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

// The mapping is exclusively owned; nothing aliases the raw pointer.
unsafe impl Send for ShareBuffer {}

fn alloc_memfd(capacity: usize) -> Result<Backing, BlitError> {
    // SAFETY: memfd_create takes a NUL-terminated name and flags.
    let raw = unsafe { libc::memfd_create(c"tessera-scratch".as_ptr(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        return Err(BlitError::Alloc {
            size: capacity,
            reason: last_os_error(),
        });
    }
    // SAFETY: raw is a freshly created fd owned solely by us.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    // SAFETY: ftruncate on a memfd we own.
    if unsafe { libc::ftruncate(fd.as_raw_fd(), capacity as libc::off_t) } != 0 {
        return Err(BlitError::Alloc {
            size: capacity,
            reason: last_os_error(),
        });
    }

    // SAFETY: standard shared read/write mapping over the memfd range just
    // sized by ftruncate.
    let map = unsafe {
        libc::mmap(
            ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if map == libc::MAP_FAILED {
        return Err(BlitError::Alloc {
            size: capacity,
            reason: last_os_error(),
        });
    }

    Ok(Backing::Memfd {
        fd,
        map: map as *mut u8,
        capacity,
    })
}

fn last_os_error() -> String {
    std::io::Error::last_os_error().to_string()
}
