//! Planar YUV layout queries.
//!
//! Callers that want to consume the decoded planes directly first ask what
//! layout the stream would produce. The answer is derived from the SOF
//! sampling factors; only the common three-plane YCbCr arrangements with
//! unit chroma factors are recognized.

use tessera_core::format::EncodedColor;

use crate::DecodeError;
use crate::markers::HeaderInfo;

/// Chroma subsampling mode, named by the usual J:a:b shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Subsampling {
    S444,
    S422,
    S420,
    S440,
    S411,
    S410,
}

impl Subsampling {
    /// Luma sampling factors (h, v) for this mode.
    pub fn luma_factors(self) -> (u8, u8) {
        match self {
            Subsampling::S444 => (1, 1),
            Subsampling::S422 => (2, 1),
            Subsampling::S420 => (2, 2),
            Subsampling::S440 => (1, 2),
            Subsampling::S411 => (4, 1),
            Subsampling::S410 => (4, 2),
        }
    }

    fn from_luma_factors(h: u8, v: u8) -> Option<Self> {
        Some(match (h, v) {
            (1, 1) => Subsampling::S444,
            (2, 1) => Subsampling::S422,
            (2, 2) => Subsampling::S420,
            (1, 2) => Subsampling::S440,
            (4, 1) => Subsampling::S411,
            (4, 2) => Subsampling::S410,
            _ => return None,
        })
    }
}

/// Geometry of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneInfo {
    pub width: u32,
    pub height: u32,
    pub row_bytes: usize,
}

/// Three-plane layout for a planar readout of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuvLayout {
    pub subsampling: Subsampling,
    pub y: PlaneInfo,
    pub cb: PlaneInfo,
    pub cr: PlaneInfo,
}

/// Classify the stream's planar layout.
///
/// Fails with [`DecodeError::Unimplemented`] for anything other than
/// three-component YCbCr with 1x1 chroma factors and a recognized luma
/// factor pair.
pub fn query_yuv_layout(header: &HeaderInfo) -> Result<YuvLayout, DecodeError> {
    if header.encoded_color != EncodedColor::Ycbcr || header.components.len() != 3 {
        return Err(DecodeError::Unimplemented(
            "planar readout needs a YCbCr stream".into(),
        ));
    }
    let luma = header.components[0];
    for chroma in &header.components[1..] {
        if chroma.h != 1 || chroma.v != 1 {
            return Err(DecodeError::Unimplemented(format!(
                "chroma sampling {}x{} not planar-readable",
                chroma.h, chroma.v
            )));
        }
    }
    let subsampling = Subsampling::from_luma_factors(luma.h, luma.v)
        .ok_or_else(|| {
            DecodeError::Unimplemented(format!(
                "luma sampling {}x{} not planar-readable",
                luma.h, luma.v
            ))
        })?;

    // Rows are padded out to whole 8-pixel blocks, matching what the
    // entropy decoder emits.
    let plane = |w: u32, h: u32| PlaneInfo {
        width: w,
        height: h,
        row_bytes: w.div_ceil(8) as usize * 8,
    };
    let chroma_w = header.width.div_ceil(luma.h as u32);
    let chroma_h = header.height.div_ceil(luma.v as u32);
    Ok(YuvLayout {
        subsampling,
        y: plane(header.width, header.height),
        cb: plane(chroma_w, chroma_h),
        cr: plane(chroma_w, chroma_h),
    })
}
