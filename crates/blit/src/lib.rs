#![doc = include_str!("../README.md")]

pub mod heap;
pub mod postproc;

use thiserror::Error;

/// Errors raised by the share heap or the post-processor contract.
#[derive(Debug, Error)]
pub enum BlitError {
    /// Shared memory could not be allocated or mapped.
    #[error("shared allocation of {size} bytes failed: {reason}")]
    Alloc { size: usize, reason: String },
    /// Cache synchronization before an fd handoff failed.
    #[error("cache flush failed: {0}")]
    Flush(String),
    /// No post-processing service exists on this platform.
    #[error("post-process service unavailable")]
    Unavailable,
    /// The service refused or failed the request.
    #[error("blit rejected: {0}")]
    Rejected(String),
}

pub mod prelude {
    pub use crate::{
        BlitError,
        heap::{ShareBuffer, ShareHeap},
        postproc::{BlitRequest, LoopbackBlitter, PostProcessor, PqMode, Scenario, probe_blitter},
    };
}
