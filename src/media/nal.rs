//! NAL unit scanning for Annex-B elementary streams
//!
//! Inside a transport stream, H.264 and H.265 are carried in Annex-B form:
//! NAL units separated by `00 00 01` (or `00 00 00 01`) start codes.
//!
//! ```text
//! H.264 NAL header:  forbidden (1) | nal_ref_idc (2) | nal_unit_type (5)
//! H.265 NAL header:  forbidden (1) | nal_unit_type (6) | layer_id (6) | tid (3)
//! ```
//!
//! MPEG-1/2 video uses the same start code prefix; the byte after the prefix
//! is the start code value (`0xB3` = sequence header).

use super::ts::StreamType;

/// H.264 NAL unit type (5 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvcNaluType(pub u8);

impl AvcNaluType {
    const IDR: u8 = 5;
    const SPS: u8 = 7;

    pub fn from_byte(b: u8) -> Self {
        AvcNaluType(b & 0x1F)
    }

    /// IDR slice
    pub fn is_keyframe(&self) -> bool {
        self.0 == Self::IDR
    }

    /// Sequence parameter set, sent right ahead of an IDR picture
    pub fn is_sequence_start(&self) -> bool {
        self.0 == Self::SPS
    }
}

/// H.265 NAL unit type (6 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcNaluType(pub u8);

impl HevcNaluType {
    const VPS: u8 = 32;
    const SPS: u8 = 33;

    pub fn from_byte(b: u8) -> Self {
        HevcNaluType((b >> 1) & 0x3F)
    }

    /// Intra random access point (BLA, IDR or CRA)
    pub fn is_irap(&self) -> bool {
        (16..=23).contains(&self.0)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self.0, Self::VPS | Self::SPS)
    }
}

/// MPEG-1/2 video sequence header start code value
const MPEG_SEQUENCE_HEADER: u8 = 0xB3;

/// Iterator over Annex-B units
///
/// Each item starts with the byte following a start code prefix and runs
/// up to the next prefix (or the end of the data).
pub struct AnnexBIterator<'a> {
    data: &'a [u8],
    next: Option<usize>,
}

impl<'a> AnnexBIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let next = find_start_code(data, 0);
        Self { data, next }
    }
}

impl<'a> Iterator for AnnexBIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next? + 3;
        self.next = find_start_code(self.data, start);
        let end = self.next.unwrap_or(self.data.len());
        Some(&self.data[start..end])
    }
}

/// Position of the next `00 00 01` prefix at or after `from`
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(3)
        .position(|w| w == [0x00, 0x00, 0x01])
        .map(|p| p + from)
}

/// Whether `es` (the start of an access unit) opens a decodable picture
///
/// Parameter sets count as a keyframe start since encoders emit them
/// immediately ahead of the random access picture.
pub fn is_keyframe_start(stream_type: StreamType, es: &[u8]) -> bool {
    let mut units = AnnexBIterator::new(es).filter_map(|unit| unit.first().copied());

    match stream_type {
        StreamType::H264 => units.any(|b| {
            let t = AvcNaluType::from_byte(b);
            t.is_keyframe() || t.is_sequence_start()
        }),
        StreamType::H265 => units.any(|b| {
            let t = HevcNaluType::from_byte(b);
            t.is_irap() || t.is_parameter_set()
        }),
        StreamType::Mpeg1Video | StreamType::Mpeg2Video => {
            units.any(|b| b == MPEG_SEQUENCE_HEADER)
        }
        StreamType::Audio(_) | StreamType::Other(_) => false,
    }
}
