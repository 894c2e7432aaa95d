use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight counters for the hybrid hardware/software decode path.
///
/// # Example
/// ```rust
/// use tessera_core::metrics::DecodeMetrics;
///
/// let metrics = DecodeMetrics::default();
/// metrics.hw_attempt();
/// metrics.hw_fallback();
/// assert_eq!(metrics.hw_attempts(), 1);
/// assert_eq!(metrics.hw_fallbacks(), 1);
/// ```
#[derive(Debug, Default)]
pub struct DecodeMetrics {
    hw_attempts: AtomicU64,
    hw_accepted: AtomicU64,
    hw_fallbacks: AtomicU64,
    scratch_allocs: AtomicU64,
}

impl DecodeMetrics {
    /// A hardware post-process request was submitted.
    pub fn hw_attempt(&self) {
        self.hw_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// A hardware post-process request succeeded.
    pub fn hw_accept(&self) {
        self.hw_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// The decode degraded to the software copy path.
    pub fn hw_fallback(&self) {
        self.hw_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// A scratch buffer was allocated or regrown.
    pub fn scratch_alloc(&self) {
        self.scratch_allocs.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of submitted hardware requests.
    pub fn hw_attempts(&self) -> u64 {
        self.hw_attempts.load(Ordering::Relaxed)
    }

    /// Snapshot of accepted hardware requests.
    pub fn hw_accepts(&self) -> u64 {
        self.hw_accepted.load(Ordering::Relaxed)
    }

    /// Snapshot of software fallbacks.
    pub fn hw_fallbacks(&self) -> u64 {
        self.hw_fallbacks.load(Ordering::Relaxed)
    }

    /// Snapshot of scratch allocations.
    pub fn scratch_allocs(&self) -> u64 {
        self.scratch_allocs.load(Ordering::Relaxed)
    }
}

impl Clone for DecodeMetrics {
    fn clone(&self) -> Self {
        let cloned = DecodeMetrics::default();
        cloned
            .hw_attempts
            .store(self.hw_attempts(), Ordering::Relaxed);
        cloned
            .hw_accepted
            .store(self.hw_accepts(), Ordering::Relaxed);
        cloned
            .hw_fallbacks
            .store(self.hw_fallbacks(), Ordering::Relaxed);
        cloned
            .scratch_allocs
            .store(self.scratch_allocs(), Ordering::Relaxed);
        cloned
    }
}
