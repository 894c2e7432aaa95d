//! JPEG marker segment parsing.
//!
//! Walks the segment stream up to the first SOS, collecting frame geometry,
//! component sampling factors, the Adobe transform hint, and the raw APP1 /
//! APP2 payloads that the metadata parsers consume later.

use smallvec::SmallVec;
use tessera_core::format::EncodedColor;

use crate::DecodeError;

pub const MARKER_SOI: u8 = 0xD8;
pub const MARKER_EOI: u8 = 0xD9;
pub const MARKER_SOS: u8 = 0xDA;
pub const MARKER_APP1: u8 = 0xE1;
pub const MARKER_APP2: u8 = 0xE2;
pub const MARKER_APP14: u8 = 0xEE;

/// One frame component as declared in the SOF segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SofComponent {
    pub id: u8,
    /// Horizontal sampling factor, 1..=4.
    pub h: u8,
    /// Vertical sampling factor, 1..=4.
    pub v: u8,
}

/// Everything learned from the segments preceding the first scan.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    pub width: u32,
    pub height: u32,
    pub progressive: bool,
    pub components: SmallVec<[SofComponent; 4]>,
    pub encoded_color: EncodedColor,
    /// APP1 payloads (after the length field), in stream order.
    pub app1: SmallVec<[Vec<u8>; 1]>,
    /// APP2 payloads, in stream order. ICC profiles span several of these.
    pub app2: SmallVec<[Vec<u8>; 4]>,
    /// Adobe APP14 color transform byte, when the segment is present.
    pub adobe_transform: Option<u8>,
}

fn is_sof(marker: u8) -> bool {
    // SOF0..SOF15 minus DHT (C4), JPG (C8), DAC (CC).
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD7 | MARKER_SOI | MARKER_EOI)
}

/// Classify the encoded color space the way libjpeg's defaults do: trust the
/// Adobe transform when present, otherwise go by component count and IDs.
fn classify_color(
    components: &[SofComponent],
    adobe_transform: Option<u8>,
) -> Result<EncodedColor, DecodeError> {
    match components.len() {
        1 => Ok(EncodedColor::Gray),
        3 => match adobe_transform {
            Some(0) => Ok(EncodedColor::Rgb),
            Some(_) => Ok(EncodedColor::Ycbcr),
            None => {
                let ids: Vec<u8> = components.iter().map(|c| c.id).collect();
                if ids == [b'R', b'G', b'B'] {
                    Ok(EncodedColor::Rgb)
                } else {
                    Ok(EncodedColor::Ycbcr)
                }
            }
        },
        4 => match adobe_transform {
            Some(2) => Ok(EncodedColor::Ycck),
            _ => Ok(EncodedColor::Cmyk),
        },
        n => Err(DecodeError::InvalidInput(format!(
            "unsupported component count {n}"
        ))),
    }
}

/// Parse the header segments of `bytes`, which must start at SOI.
///
/// Returns [`DecodeError::IncompleteInput`] when the buffer ends before the
/// first SOS, so a caller holding a partial prefix can distinguish "feed me
/// more" from a malformed stream.
pub fn parse_header(bytes: &[u8]) -> Result<HeaderInfo, DecodeError> {
    if !crate::is_jpeg(bytes) {
        return Err(DecodeError::InvalidInput("missing JPEG signature".into()));
    }
    let mut pos = 2usize;
    let mut sof: Option<(u32, u32, bool, SmallVec<[SofComponent; 4]>)> = None;
    let mut app1: SmallVec<[Vec<u8>; 1]> = SmallVec::new();
    let mut app2: SmallVec<[Vec<u8>; 4]> = SmallVec::new();
    let mut adobe_transform = None;

    loop {
        // Scan for the next marker, tolerating fill bytes.
        let Some(ff) = bytes[pos..].iter().position(|&b| b == 0xFF) else {
            return Err(DecodeError::incomplete());
        };
        pos += ff + 1;
        let marker = loop {
            match bytes.get(pos) {
                None => return Err(DecodeError::incomplete()),
                Some(0xFF) => pos += 1,
                Some(&m) => {
                    pos += 1;
                    break m;
                }
            }
        };
        if marker == 0x00 {
            continue;
        }
        if is_standalone(marker) {
            if marker == MARKER_EOI {
                return Err(DecodeError::InvalidInput("EOI before SOS".into()));
            }
            continue;
        }
        if bytes.len() < pos + 2 {
            return Err(DecodeError::incomplete());
        }
        let len = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        if len < 2 {
            return Err(DecodeError::InvalidInput("segment length < 2".into()));
        }
        if marker == MARKER_SOS {
            let (width, height, progressive, components) = sof
                .ok_or_else(|| DecodeError::InvalidInput("SOS before SOF".into()))?;
            let encoded_color = classify_color(&components, adobe_transform)?;
            return Ok(HeaderInfo {
                width,
                height,
                progressive,
                components,
                encoded_color,
                app1,
                app2,
                adobe_transform,
            });
        }
        if bytes.len() < pos + len {
            return Err(DecodeError::incomplete());
        }
        let body = &bytes[pos + 2..pos + len];
        match marker {
            m if is_sof(m) => {
                if body.len() < 6 {
                    return Err(DecodeError::InvalidInput("truncated SOF".into()));
                }
                let height = u16::from_be_bytes([body[1], body[2]]) as u32;
                let width = u16::from_be_bytes([body[3], body[4]]) as u32;
                if width == 0 || height == 0 {
                    return Err(DecodeError::InvalidInput("zero frame dimension".into()));
                }
                let ncomp = body[5] as usize;
                if body.len() < 6 + ncomp * 3 {
                    return Err(DecodeError::InvalidInput("truncated SOF components".into()));
                }
                let mut components = SmallVec::new();
                for i in 0..ncomp {
                    let c = &body[6 + i * 3..];
                    components.push(SofComponent {
                        id: c[0],
                        h: c[1] >> 4,
                        v: c[1] & 0x0F,
                    });
                }
                let progressive = matches!(m, 0xC2 | 0xC6 | 0xCA | 0xCE);
                sof = Some((width, height, progressive, components));
            }
            MARKER_APP1 => app1.push(body.to_vec()),
            MARKER_APP2 => app2.push(body.to_vec()),
            MARKER_APP14 => {
                // "Adobe" + version/flags (6 bytes) + transform.
                if body.len() >= 12 && &body[..5] == b"Adobe" {
                    adobe_transform = Some(body[11]);
                }
            }
            _ => {}
        }
        pos += len;
    }
}
