//! Scale negotiation.
//!
//! JPEG supports cheap downscale during decode at multiples of one eighth.
//! A caller's fractional scale request is mapped onto an eighths numerator
//! through a fixed breakpoint table, then snapped to the nearest numerator
//! the scanline backend can honor natively.

/// Thresholds for mapping a desired scale onto an eighths numerator.
/// A desired scale at or above `SCALE_BREAKPOINTS[i]` selects numerator
/// `8 - i`; below the last entry the numerator is 1.
pub const SCALE_BREAKPOINTS: [f32; 7] =
    [0.9375, 0.8125, 0.6875, 0.5625, 0.4375, 0.3125, 0.1875];

/// Map a desired scale in (0, 1] to an eighths numerator in 1..=8.
pub fn eighth_for_scale(desired: f32) -> u8 {
    for (i, &breakpoint) in SCALE_BREAKPOINTS.iter().enumerate() {
        if desired >= breakpoint {
            return 8 - i as u8;
        }
    }
    1
}

/// Snap an eighths numerator to the smallest one the scanline backend
/// supports natively that does not shrink below the request. The backend
/// only implements the power-of-two IDCT scales.
pub fn native_numerator(eighth: u8) -> u8 {
    match eighth {
        0..=1 => 1,
        2 => 2,
        3..=4 => 4,
        _ => 8,
    }
}

/// One dimension scaled by `num`/8, rounded up.
pub fn scaled_dimension(dim: u32, num: u8) -> u32 {
    (dim as u64 * num as u64).div_ceil(8) as u32
}

pub fn scaled_dims(width: u32, height: u32, num: u8) -> (u32, u32) {
    (scaled_dimension(width, num), scaled_dimension(height, num))
}

/// One dimension after picking every `sample`-th pixel starting from
/// `sample / 2`.
pub fn sampled_dimension(dim: u32, sample: u32) -> u32 {
    dim.saturating_sub(sample / 2).div_ceil(sample).max(1)
}

/// Find the uniform sampling period that maps `full` onto `requested`
/// exactly, if any.
pub fn sample_for_dims(full: (u32, u32), requested: (u32, u32)) -> Option<u32> {
    (2..=64u32).find(|&s| {
        sampled_dimension(full.0, s) == requested.0
            && sampled_dimension(full.1, s) == requested.1
    })
}

/// Find the eighths numerator whose scaled dimensions match `requested`
/// exactly, if any. Used to validate a caller-supplied output size before
/// falling back to sampled decode.
pub fn numerator_for_dims(
    full: (u32, u32),
    requested: (u32, u32),
) -> Option<u8> {
    (1..=8u8).find(|&num| scaled_dims(full.0, full.1, num) == requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_map_to_numerators() {
        assert_eq!(eighth_for_scale(1.0), 8);
        assert_eq!(eighth_for_scale(0.9375), 8);
        assert_eq!(eighth_for_scale(0.9374), 7);
        assert_eq!(eighth_for_scale(0.8125), 7);
        assert_eq!(eighth_for_scale(0.75), 6);
        assert_eq!(eighth_for_scale(0.5), 4);
        assert_eq!(eighth_for_scale(0.1875), 2);
        assert_eq!(eighth_for_scale(0.1), 1);
    }

    #[test]
    fn native_snap_never_shrinks() {
        for eighth in 1..=8u8 {
            let native = native_numerator(eighth);
            assert!(native >= eighth);
            assert!(matches!(native, 1 | 2 | 4 | 8));
        }
        assert_eq!(native_numerator(3), 4);
        assert_eq!(native_numerator(5), 8);
    }

    #[test]
    fn scaled_dims_round_up() {
        assert_eq!(scaled_dims(100, 100, 8), (100, 100));
        assert_eq!(scaled_dims(100, 100, 4), (50, 50));
        assert_eq!(scaled_dims(99, 33, 1), (13, 5));
        assert_eq!(scaled_dims(1, 1, 1), (1, 1));
    }

    #[test]
    fn sampled_dimensions_match_period_picks() {
        assert_eq!(sampled_dimension(8, 2), 4);
        assert_eq!(sampled_dimension(10, 4), 2);
        assert_eq!(sampled_dimension(24, 3), 8);
        assert_eq!(sampled_dimension(1, 8), 1);
        assert_eq!(sample_for_dims((24, 24), (8, 8)), Some(3));
        assert_eq!(sample_for_dims((64, 64), (32, 32)), Some(2));
        assert_eq!(sample_for_dims((64, 64), (63, 63)), None);
    }

    #[test]
    fn exact_dimension_search() {
        assert_eq!(numerator_for_dims((640, 480), (640, 480)), Some(8));
        assert_eq!(numerator_for_dims((640, 480), (320, 240)), Some(4));
        assert_eq!(numerator_for_dims((640, 480), (80, 60)), Some(1));
        assert_eq!(numerator_for_dims((640, 480), (100, 100)), None);
        assert_eq!(numerator_for_dims((99, 33), (13, 5)), Some(1));
    }
}
