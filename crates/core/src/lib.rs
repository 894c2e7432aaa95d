#![doc = include_str!("../README.md")]

pub mod format;
pub mod geometry;
pub mod metrics;

pub mod prelude {
    pub use crate::{
        format::{ColorType, EncodedColor, Orientation, Resolution},
        geometry::Rect,
        metrics::DecodeMetrics,
    };
}
