//! Decode policy knobs.

/// Smallest output width where the hybrid block path is worth engaging.
pub const DEFAULT_MIN_OPT_WIDTH: u32 = 256;

/// Smallest output pixel area where the hybrid block path is worth engaging.
pub const DEFAULT_MIN_OPT_AREA: u64 = 1_000_000;

/// How the perceptual-quality blit stage is gated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PqOverride {
    /// Decide per image from its own characteristics.
    #[default]
    PerImage,
    ForceOff,
    ForceOn,
}

impl PqOverride {
    /// Collapse the override and the per-image decision into the effective
    /// PQ state for one decode.
    pub fn resolve(self, image_wants_pq: bool) -> bool {
        match self {
            PqOverride::PerImage => image_wants_pq,
            PqOverride::ForceOff => false,
            PqOverride::ForceOn => true,
        }
    }
}

/// Policy inputs for one codec instance.
///
/// # Example
/// ```rust
/// use tessera_jpeg::tunables::DecodeTunables;
///
/// let tunables = DecodeTunables { min_opt_width: 0, ..Default::default() };
/// assert_eq!(tunables.sanitized().min_opt_width, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodeTunables {
    /// Master switch for the hybrid block path. When off, every decode
    /// takes the plain software route.
    pub opt_enabled: bool,
    pub pq_override: PqOverride,
    pub min_opt_width: u32,
    pub min_opt_area: u64,
}

impl Default for DecodeTunables {
    fn default() -> Self {
        Self {
            opt_enabled: true,
            pq_override: PqOverride::default(),
            min_opt_width: DEFAULT_MIN_OPT_WIDTH,
            min_opt_area: DEFAULT_MIN_OPT_AREA,
        }
    }
}

impl DecodeTunables {
    /// Clamp fields into usable ranges.
    pub fn sanitized(self) -> Self {
        Self {
            min_opt_width: self.min_opt_width.max(1),
            min_opt_area: self.min_opt_area.max(1),
            ..self
        }
    }

    /// Whether an output of `width` x `height` qualifies for the hybrid
    /// block path under these tunables.
    pub fn qualifies(&self, width: u32, height: u32) -> bool {
        self.opt_enabled
            && width >= self.min_opt_width
            && u64::from(width) * u64::from(height) >= self.min_opt_area
    }
}
