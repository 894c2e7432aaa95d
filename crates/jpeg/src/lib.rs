#![doc = include_str!("../README.md")]

pub mod codec;
pub mod markers;
pub mod metadata;
pub mod scale;
pub mod session;
pub mod stream;
pub mod swizzle;
pub mod tiles;
pub mod tunables;
pub mod yuv;

#[cfg(test)]
pub(crate) mod testutil;

use thiserror::Error;

/// Failures surfaced to the caller of a decode operation.
///
/// Metadata extraction never produces these; it degrades to "absent".
/// Scratch-allocation and hardware failures degrade to the software path.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Malformed header, markers, or bitstream.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The stream starved mid-parse or mid-decode; `rows` output rows were
    /// fully produced and remain usable.
    #[error("incomplete input after {rows} rows")]
    IncompleteInput { rows: usize },
    /// The stream does not support seeking back to a prior position.
    #[error("stream cannot rewind")]
    CouldNotRewind,
    /// Unsupported combination of request and decoder state.
    #[error("unsupported: {0}")]
    Unimplemented(String),
    /// Resource allocation failed.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl DecodeError {
    pub(crate) fn incomplete() -> Self {
        DecodeError::IncompleteInput { rows: 0 }
    }
}

/// JPEG signature sniff over the first bytes of a stream.
///
/// # Example
/// ```rust
/// assert!(tessera_jpeg::is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
/// assert!(!tessera_jpeg::is_jpeg(&[0x89, b'P', b'N', b'G']));
/// ```
pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[..3] == [0xFF, 0xD8, 0xFF]
}

pub mod prelude {
    pub use crate::{
        DecodeError, is_jpeg,
        codec::{DecodeOptions, JpegCodec},
        tunables::{DecodeTunables, PqOverride},
        yuv::{Subsampling, YuvLayout},
    };
    pub use tessera_blit::prelude::*;
    pub use tessera_core::prelude::*;
}
