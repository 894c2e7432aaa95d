//! Hand-assembled JPEG fixtures for tests.
//!
//! The fixtures use one-entry Huffman tables (a single length-1 code for DC
//! category zero and for the AC end-of-block symbol) and an all-ones
//! quantization table, so every block costs two bits and decodes to a flat
//! mid-gray 128. Gray fixtures carry one component; color fixtures carry
//! three YCbCr components at 1:1:1 sampling, which decode to RGB
//! (128, 128, 128).

pub struct FixtureOptions {
    pub width: u16,
    pub height: u16,
    pub color: bool,
    /// Extra segments inserted between SOI and DQT, e.g. APP1/APP2.
    pub pre_sof_segments: Vec<Vec<u8>>,
}

impl FixtureOptions {
    pub fn gray(width: u16, height: u16) -> Self {
        Self { width, height, color: false, pre_sof_segments: Vec::new() }
    }

    pub fn color(width: u16, height: u16) -> Self {
        Self { width, height, color: true, pre_sof_segments: Vec::new() }
    }

    pub fn with_segments(mut self, segments: Vec<Vec<u8>>) -> Self {
        self.pre_sof_segments = segments;
        self
    }
}

/// A complete marker segment: 0xFF, marker, big-endian length, body.
pub fn segment(marker: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((body.len() as u16 + 2).to_be_bytes()));
    out.extend_from_slice(body);
    out
}

/// An APP1 segment carrying a little-endian EXIF payload with the given
/// orientation and, optionally, an Exif sub-IFD holding an ISO SHORT.
pub fn exif_app1(orientation: u16, iso: Option<u16>) -> Vec<u8> {
    const TAG_ORIENTATION: u16 = 0x0112;
    const TAG_EXIF_IFD: u16 = 0x8769;
    const TAG_ISO_SPEED: u16 = 0x8827;

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());

    let ifd0_entries = 1 + usize::from(iso.is_some());
    let sub_ifd_off = 8 + 2 + ifd0_entries * 12 + 4;
    tiff.extend_from_slice(&(ifd0_entries as u16).to_le_bytes());
    let mut entry = |tag: u16, ty: u16, value: u32| {
        tiff.extend_from_slice(&tag.to_le_bytes());
        tiff.extend_from_slice(&ty.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&value.to_le_bytes());
    };
    entry(TAG_ORIENTATION, 3, orientation as u32);
    if iso.is_some() {
        entry(TAG_EXIF_IFD, 4, sub_ifd_off as u32);
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());
    if let Some(iso) = iso {
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&TAG_ISO_SPEED.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&(iso as u32).to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes());
    }

    let mut body = b"Exif\0".to_vec();
    body.push(0);
    body.extend_from_slice(&tiff);
    segment(0xE1, &body)
}

/// An APP2 ICC fragment segment.
pub fn icc_app2(index: u8, total: u8, data: &[u8]) -> Vec<u8> {
    let mut body = b"ICC_PROFILE\0".to_vec();
    body.push(index);
    body.push(total);
    body.extend_from_slice(data);
    segment(0xE2, &body)
}

struct BitWriter {
    bytes: Vec<u8>,
    acc: u8,
    nbits: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self { bytes: Vec::new(), acc: 0, nbits: 0 }
    }

    fn push_bit(&mut self, bit: u8) {
        self.acc = (self.acc << 1) | (bit & 1);
        self.nbits += 1;
        if self.nbits == 8 {
            self.flush_byte();
        }
    }

    fn flush_byte(&mut self) {
        self.bytes.push(self.acc);
        if self.acc == 0xFF {
            self.bytes.push(0x00);
        }
        self.acc = 0;
        self.nbits = 0;
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            while self.nbits < 8 {
                self.acc = (self.acc << 1) | 1;
                self.nbits += 1;
            }
            self.flush_byte();
        }
        self.bytes
    }
}

pub fn build_jpeg(opts: &FixtureOptions) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    for seg in &opts.pre_sof_segments {
        data.extend_from_slice(seg);
    }

    let mut dqt = vec![0x00];
    dqt.extend_from_slice(&[1u8; 64]);
    data.extend_from_slice(&segment(0xDB, &dqt));

    let ncomp: u8 = if opts.color { 3 } else { 1 };
    let mut sof = vec![8];
    sof.extend_from_slice(&opts.height.to_be_bytes());
    sof.extend_from_slice(&opts.width.to_be_bytes());
    sof.push(ncomp);
    for id in 1..=ncomp {
        sof.extend_from_slice(&[id, 0x11, 0x00]);
    }
    data.extend_from_slice(&segment(0xC0, &sof));

    // One length-1 code "0": DC category 0 and AC end-of-block.
    for class_id in [0x00u8, 0x10] {
        let mut dht = vec![class_id, 1];
        dht.extend_from_slice(&[0u8; 15]);
        dht.push(0x00);
        data.extend_from_slice(&segment(0xC4, &dht));
    }

    let mut sos = vec![ncomp];
    for id in 1..=ncomp {
        sos.extend_from_slice(&[id, 0x00]);
    }
    sos.extend_from_slice(&[0, 63, 0]);
    data.extend_from_slice(&segment(0xDA, &sos));

    let mcus = opts.width.div_ceil(8) as usize * opts.height.div_ceil(8) as usize;
    let blocks_per_mcu = ncomp as usize;
    let mut bits = BitWriter::new();
    for _ in 0..mcus * blocks_per_mcu {
        bits.push_bit(0); // DC diff category 0
        bits.push_bit(0); // AC end-of-block
    }
    data.extend_from_slice(&bits.finish());

    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_parses_as_header() {
        let data = build_jpeg(
            &FixtureOptions::gray(24, 16)
                .with_segments(vec![exif_app1(6, Some(200)), icc_app2(1, 1, b"p")]),
        );
        let hdr = crate::markers::parse_header(&data).unwrap();
        assert_eq!((hdr.width, hdr.height), (24, 16));
        assert_eq!(hdr.app1.len(), 1);
        assert_eq!(hdr.app2.len(), 1);
    }
}
