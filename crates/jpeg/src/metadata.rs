//! Metadata extraction from retained marker payloads.
//!
//! All extractors here are total: malformed or missing metadata degrades to
//! "absent" rather than failing the decode. EXIF orientation and ISO speed
//! come out of APP1, ICC profiles are reassembled from their APP2 fragments.

use smallvec::SmallVec;
use tessera_core::format::Orientation;
use tracing::debug;

/// EXIF payload signature at the start of an APP1 body, followed by one
/// fill byte before the TIFF header.
pub const EXIF_SIGNATURE: &[u8; 5] = b"Exif\0";

/// ICC APP2 fragment signature. The full fragment header is
/// [`ICC_HEADER_SIZE`] bytes: signature, 1-based sequence index, total count.
pub const ICC_SIGNATURE: &[u8; 12] = b"ICC_PROFILE\0";
pub const ICC_HEADER_SIZE: usize = 14;

/// Upper bound on how far into an EXIF payload the IFD walks will chase
/// offsets. Keeps hostile offset chains from touching megabytes of payload.
pub const MAX_EXIF_SCAN: usize = 8 * 1024;

const TAG_ORIENTATION: u16 = 0x0112;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_ISO_SPEED: u16 = 0x8827;

/// Bounds-checked reader over a TIFF byte stream of either endianness.
struct Tiff<'a> {
    data: &'a [u8],
    le: bool,
}

impl<'a> Tiff<'a> {
    /// Validate the TIFF header ("II"/"MM" + magic 42) and return the
    /// reader plus the offset of the first IFD.
    fn parse(data: &'a [u8]) -> Option<(Self, usize)> {
        if data.len() < 8 {
            return None;
        }
        let le = match &data[0..2] {
            b"II" => true,
            b"MM" => false,
            _ => return None,
        };
        let t = Tiff { data, le };
        if t.u16_at(2)? != 42 {
            return None;
        }
        let ifd = t.u32_at(4)? as usize;
        Some((t, ifd))
    }

    fn u16_at(&self, off: usize) -> Option<u16> {
        let b: [u8; 2] = self.data.get(off..off + 2)?.try_into().ok()?;
        Some(if self.le { u16::from_le_bytes(b) } else { u16::from_be_bytes(b) })
    }

    fn u32_at(&self, off: usize) -> Option<u32> {
        let b: [u8; 4] = self.data.get(off..off + 4)?.try_into().ok()?;
        Some(if self.le { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) })
    }

    /// Scan an IFD chain for `tag` and return the offset of its 12-byte
    /// entry, following next-IFD links. The chain length is bounded so a
    /// cyclic link cannot loop forever.
    fn find_entry(&self, mut ifd: usize, tag: u16) -> Option<usize> {
        for _ in 0..8 {
            if ifd == 0 || ifd > MAX_EXIF_SCAN {
                return None;
            }
            let count = self.u16_at(ifd)? as usize;
            for i in 0..count {
                let entry = ifd + 2 + i * 12;
                if self.u16_at(entry)? == tag {
                    return Some(entry);
                }
            }
            ifd = self.u32_at(ifd + 2 + count * 12)? as usize;
        }
        None
    }

    /// Read a SHORT (type 3, count 1) entry value stored inline.
    fn short_value(&self, entry: usize) -> Option<u16> {
        if self.u16_at(entry + 2)? != 3 || self.u32_at(entry + 4)? == 0 {
            return None;
        }
        self.u16_at(entry + 8)
    }
}

/// Strip the EXIF signature and fill byte from an APP1 body, if present.
fn exif_tiff(app1: &[u8]) -> Option<&[u8]> {
    if app1.len() > 6 && &app1[..5] == EXIF_SIGNATURE {
        Some(&app1[6..])
    } else {
        None
    }
}

/// EXIF orientation from the first APP1 segment carrying an EXIF payload.
///
/// Missing or unparseable metadata yields the identity orientation.
pub fn orientation_from_markers(app1: &[Vec<u8>]) -> Orientation {
    for payload in app1 {
        let Some(tiff) = exif_tiff(payload) else { continue };
        let Some((t, ifd0)) = Tiff::parse(tiff) else { continue };
        if let Some(entry) = t.find_entry(ifd0, TAG_ORIENTATION)
            && let Some(raw) = t.short_value(entry)
            && let Some(orientation) = Orientation::from_exif(raw)
        {
            return orientation;
        }
    }
    Orientation::default()
}

/// ISO speed rating from the EXIF sub-IFD of the first EXIF APP1 payload.
///
/// Follows the Exif IFD pointer (tag 0x8769) out of IFD0, then reads the
/// ISOSpeedRatings SHORT (tag 0x8827). Offsets past [`MAX_EXIF_SCAN`] are
/// treated as absent.
pub fn scan_iso_speed(app1: &[Vec<u8>]) -> Option<u32> {
    for payload in app1 {
        let Some(tiff) = exif_tiff(payload) else { continue };
        let Some((t, ifd0)) = Tiff::parse(tiff) else { continue };
        let Some(entry) = t.find_entry(ifd0, TAG_EXIF_IFD) else { continue };
        let Some(exif_ifd) = t.u32_at(entry + 8) else { continue };
        let Some(iso_entry) = t.find_entry(exif_ifd as usize, TAG_ISO_SPEED) else {
            continue;
        };
        if let Some(iso) = t.short_value(iso_entry) {
            debug!(iso, "EXIF ISO speed");
            return Some(iso as u32);
        }
    }
    None
}

/// Reassemble an ICC profile from its APP2 fragments.
///
/// Fragments carry a 1-based sequence index and the total fragment count;
/// the profile is only returned when every fragment of the declared run is
/// present exactly once.
pub fn icc_profile_from_markers(app2: &[Vec<u8>]) -> Option<Vec<u8>> {
    let mut fragments: SmallVec<[(u8, &[u8]); 4]> = SmallVec::new();
    let mut total: Option<u8> = None;
    for payload in app2 {
        if payload.len() < ICC_HEADER_SIZE || &payload[..12] != ICC_SIGNATURE {
            continue;
        }
        let index = payload[12];
        let count = payload[13];
        if index == 0 || count == 0 || index > count {
            // A malformed header poisons the whole profile; partial
            // reassembly would hand out corrupt color data.
            debug!(index, count, "malformed ICC fragment header");
            return None;
        }
        match total {
            None => total = Some(count),
            Some(t) if t != count => {
                debug!("ICC fragments disagree on total count");
                return None;
            }
            Some(_) => {}
        }
        fragments.push((index, &payload[ICC_HEADER_SIZE..]));
    }
    let total = total?;
    if fragments.len() != total as usize {
        debug!(
            have = fragments.len(),
            total, "incomplete ICC fragment run"
        );
        return None;
    }
    fragments.sort_by_key(|&(index, _)| index);
    for (i, &(index, _)) in fragments.iter().enumerate() {
        if index as usize != i + 1 {
            return None;
        }
    }
    let mut profile = Vec::with_capacity(fragments.iter().map(|f| f.1.len()).sum());
    for (_, data) in fragments {
        profile.extend_from_slice(data);
    }
    Some(profile)
}
