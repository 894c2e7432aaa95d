//! Front-buffered stream adapter.
//!
//! JPEG header parsing needs to look at the leading segments twice: once to
//! discover geometry and markers, and again when the scanline backend takes
//! over the stream. [`FrontBufferedReader`] retains up to
//! [`FRONT_BUFFER_LIMIT`] bytes of the stream prefix so the parse can rewind
//! without requiring a seekable source, and so raw-byte scans over the
//! retained prefix stay cheap.

use std::io::{self, Read};

use crate::DecodeError;

/// Maximum number of prefix bytes retained for rewinding.
///
/// Headers larger than this (oversized thumbnails, bloated ICC payloads) push
/// the reader past the retained window and make [`FrontBufferedReader::rewind`]
/// fail, at which point the caller falls back to fully buffering the stream.
pub const FRONT_BUFFER_LIMIT: usize = 256 * 1024;

/// A reader that keeps a bounded copy of the stream prefix.
///
/// Reads are served from the retained prefix first, then from the inner
/// reader (appending to the prefix while under the limit). Once reads cross
/// the limit the prefix is frozen and rewinding is no longer possible.
pub struct FrontBufferedReader<R> {
    inner: R,
    prefix: Vec<u8>,
    /// Read cursor into the logical stream.
    offset: usize,
    /// Set once a read consumed bytes beyond the retained prefix.
    detached: bool,
}

impl<R: Read> FrontBufferedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, prefix: Vec::new(), offset: 0, detached: false }
    }

    /// The retained stream prefix read so far.
    pub fn buffered(&self) -> &[u8] {
        &self.prefix
    }

    /// Current cursor position in the logical stream.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Whether the retained prefix still covers everything read, so a
    /// [`FrontBufferedReader::rewind`] would succeed.
    pub fn can_rewind(&self) -> bool {
        !self.detached
    }

    /// Seek back to the start of the stream.
    ///
    /// Fails with [`DecodeError::CouldNotRewind`] if reads already crossed
    /// the retained window.
    pub fn rewind(&mut self) -> Result<(), DecodeError> {
        if self.detached {
            return Err(DecodeError::CouldNotRewind);
        }
        self.offset = 0;
        Ok(())
    }

    /// Read the remainder of the stream into `out`, starting from the
    /// current cursor. Used when a decode mode wants the whole bitstream
    /// resident in memory.
    pub fn drain_to_end(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        let mut total = 0;
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }
}

impl<R: Read> Read for FrontBufferedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Serve from the retained prefix when the cursor is inside it.
        if self.offset < self.prefix.len() {
            let avail = &self.prefix[self.offset..];
            let n = avail.len().min(buf.len());
            buf[..n].copy_from_slice(&avail[..n]);
            self.offset += n;
            return Ok(n);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            return Ok(0);
        }
        if !self.detached {
            let room = FRONT_BUFFER_LIMIT.saturating_sub(self.prefix.len());
            let keep = n.min(room);
            self.prefix.extend_from_slice(&buf[..keep]);
            if keep < n {
                self.detached = true;
            }
        }
        self.offset += n;
        Ok(n)
    }
}
