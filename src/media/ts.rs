//! MPEG transport stream parsing
//!
//! Only what is needed to find a clean entry point is parsed: packet
//! headers, the program association table (PAT), program map tables (PMT)
//! and the header of PES packets.
//!
//! Transport packet header:
//! ```text
//! sync (8) | TEI (1) | PUSI (1) | priority (1) | PID (13)
//! | scrambling (2) | adaptation_field_control (2) | continuity (4)
//! ```

/// Size of one transport stream packet
pub const TS_PACKET_SIZE: usize = 188;

/// First byte of every transport stream packet
pub const SYNC_BYTE: u8 = 0x47;

/// PID carrying the program association table
pub const PAT_PID: u16 = 0x0000;

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;
const CRC_SIZE: usize = 4;
/// Largest `section_length` allowed for PAT and PMT sections
const MAX_SECTION_LENGTH: usize = 1021;

/// Malformed transport stream data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TsError {
    #[error("short packet: {0} bytes")]
    ShortPacket(usize),
    #[error("missing sync byte (found {0:#04x})")]
    MissingSync(u8),
    #[error("adaptation field overruns packet")]
    BadAdaptationField,
    #[error("truncated table section")]
    TruncatedSection,
    #[error("section length {0} exceeds 1021")]
    SectionTooLong(usize),
    #[error("unexpected table id {0:#04x}")]
    UnexpectedTable(u8),
    #[error("missing PES start code")]
    NotPes,
}

/// Elementary stream type from the PMT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Mpeg1Video,
    Mpeg2Video,
    H264,
    H265,
    Audio(u8),
    Other(u8),
}

impl StreamType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => StreamType::Mpeg1Video,
            0x02 => StreamType::Mpeg2Video,
            0x1B => StreamType::H264,
            0x24 => StreamType::H265,
            0x03 | 0x04 | 0x0F | 0x11 | 0x81 | 0x87 => StreamType::Audio(b),
            other => StreamType::Other(other),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Video | StreamType::Mpeg2Video | StreamType::H264 | StreamType::H265
        )
    }
}

/// Parsed transport packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub pid: u16,
    /// Payload unit start indicator
    pub pusi: bool,
    /// Random access indicator from the adaptation field
    pub random_access: bool,
    /// Offset of the payload within the packet, `None` if there is no payload
    pub payload_offset: Option<usize>,
}

impl TsHeader {
    /// Parse the header of a single 188-byte packet
    pub fn parse(packet: &[u8]) -> Result<Self, TsError> {
        if packet.len() < TS_PACKET_SIZE {
            return Err(TsError::ShortPacket(packet.len()));
        }
        if packet[0] != SYNC_BYTE {
            return Err(TsError::MissingSync(packet[0]));
        }

        let pusi = packet[1] & 0x40 != 0;
        let pid = u16::from_be_bytes([packet[1] & 0x1F, packet[2]]);
        let adaptation_control = (packet[3] >> 4) & 0x03;

        let mut offset = 4;
        let mut random_access = false;
        if adaptation_control & 0x02 != 0 {
            let length = packet[4] as usize;
            if 5 + length > TS_PACKET_SIZE {
                return Err(TsError::BadAdaptationField);
            }
            if length > 0 {
                random_access = packet[5] & 0x40 != 0;
            }
            offset = 5 + length;
        }

        let payload_offset =
            (adaptation_control & 0x01 != 0 && offset < TS_PACKET_SIZE).then_some(offset);

        Ok(Self {
            pid,
            pusi,
            random_access,
            payload_offset,
        })
    }

    /// Payload bytes of `packet`
    pub fn payload<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
        match self.payload_offset {
            Some(offset) => &packet[offset..TS_PACKET_SIZE],
            None => &[],
        }
    }
}

/// Locate the section body of a PSI table starting in `payload`
///
/// Returns the bytes between the section header and the CRC.
fn section(payload: &[u8], table_id: u8) -> Result<&[u8], TsError> {
    let pointer = *payload.first().ok_or(TsError::TruncatedSection)? as usize;
    let table = payload
        .get(1 + pointer..)
        .ok_or(TsError::TruncatedSection)?;
    if table.len() < 3 {
        return Err(TsError::TruncatedSection);
    }
    if table[0] != table_id {
        return Err(TsError::UnexpectedTable(table[0]));
    }

    let section_length = (u16::from_be_bytes([table[1], table[2]]) & 0x0FFF) as usize;
    // table_id_extension (2) + version (1) + section_number (1) + last_section_number (1)
    if section_length < 5 + CRC_SIZE || table.len() < 3 + section_length {
        return Err(TsError::TruncatedSection);
    }

    Ok(&table[8..3 + section_length - CRC_SIZE])
}

/// Bytes of `payload`, counted from the pointer field, that cover the
/// whole PSI section starting in it
///
/// Sections may continue over several packets on the same PID. Returns
/// `Ok(None)` until enough of the payload is present to read the section
/// header.
pub fn section_span(payload: &[u8]) -> Result<Option<usize>, TsError> {
    let Some(&pointer) = payload.first() else {
        return Ok(None);
    };
    let start = 1 + pointer as usize;
    let Some(header) = payload.get(start..start + 3) else {
        return Ok(None);
    };

    let section_length = (u16::from_be_bytes([header[1], header[2]]) & 0x0FFF) as usize;
    if section_length > MAX_SECTION_LENGTH {
        return Err(TsError::SectionTooLong(section_length));
    }
    Ok(Some(start + 3 + section_length))
}

/// Parse a PAT, returning `(program_number, pmt_pid)` pairs
///
/// Program 0 (the network information PID) is skipped.
pub fn parse_pat(payload: &[u8]) -> Result<Vec<(u16, u16)>, TsError> {
    let body = section(payload, TABLE_ID_PAT)?;

    Ok(body
        .chunks_exact(4)
        .filter_map(|entry| {
            let program = u16::from_be_bytes([entry[0], entry[1]]);
            let pid = u16::from_be_bytes([entry[2] & 0x1F, entry[3]]);
            (program != 0).then_some((program, pid))
        })
        .collect())
}

/// Elementary stream listed in a PMT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: StreamType,
    pub pid: u16,
}

/// Parse a PMT, returning its elementary streams in table order
pub fn parse_pmt(payload: &[u8]) -> Result<Vec<PmtStream>, TsError> {
    let body = section(payload, TABLE_ID_PMT)?;
    if body.len() < 4 {
        return Err(TsError::TruncatedSection);
    }

    // PCR_PID (2) then program_info_length (2)
    let info_length = (u16::from_be_bytes([body[2], body[3]]) & 0x0FFF) as usize;
    let mut rest = body.get(4 + info_length..).ok_or(TsError::TruncatedSection)?;

    let mut streams = Vec::new();
    while rest.len() >= 5 {
        let stream_type = StreamType::from_byte(rest[0]);
        let pid = u16::from_be_bytes([rest[1] & 0x1F, rest[2]]);
        let es_info_length = (u16::from_be_bytes([rest[3], rest[4]]) & 0x0FFF) as usize;
        streams.push(PmtStream { stream_type, pid });
        rest = rest
            .get(5 + es_info_length..)
            .ok_or(TsError::TruncatedSection)?;
    }

    Ok(streams)
}

/// Elementary stream bytes following the PES header at the start of `payload`
pub fn pes_payload(payload: &[u8]) -> Result<&[u8], TsError> {
    if payload.len() < 6 || payload[..3] != [0x00, 0x00, 0x01] {
        return Err(TsError::NotPes);
    }

    let stream_id = payload[3];
    // Stream ids without the optional PES header
    // (program_stream_map, padding, private_stream_2, ECM, EMM, directory, DSMCC, H.222.1 type E)
    if matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xFF | 0xF2 | 0xF8) {
        return Ok(&payload[6..]);
    }

    if payload.len() < 9 {
        return Err(TsError::NotPes);
    }
    let header_length = payload[8] as usize;
    payload.get(9 + header_length..).ok_or(TsError::NotPes)
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_parse_header() {
        let packet = pes_start(VIDEO_PID, &h264_keyframe());
        let header = TsHeader::parse(&packet).unwrap();

        assert_eq!(header.pid, VIDEO_PID);
        assert!(header.pusi);
        assert!(!header.random_access);
        assert_eq!(header.payload_offset, Some(4));
        assert_eq!(header.payload(&packet).len(), TS_PACKET_SIZE - 4);
    }

    #[test]
    fn test_parse_header_adaptation_field() {
        let mut packet = continuation(VIDEO_PID, 0xAA);
        packet[3] = 0x30; // adaptation + payload
        packet[4] = 7;
        packet[5] = 0x40; // random access
        let header = TsHeader::parse(&packet).unwrap();

        assert!(header.random_access);
        assert_eq!(header.payload_offset, Some(12));

        // Adaptation field only
        packet[3] = 0x20;
        packet[4] = 183;
        let header = TsHeader::parse(&packet).unwrap();
        assert_eq!(header.payload_offset, None);
        assert!(header.payload(&packet).is_empty());
    }

    #[test]
    fn test_parse_header_errors() {
        assert_eq!(TsHeader::parse(&[0x47; 10]), Err(TsError::ShortPacket(10)));

        let mut packet = continuation(VIDEO_PID, 0);
        packet[0] = 0x00;
        assert_eq!(TsHeader::parse(&packet), Err(TsError::MissingSync(0)));

        let mut packet = continuation(VIDEO_PID, 0);
        packet[3] = 0x30;
        packet[4] = 190;
        assert_eq!(TsHeader::parse(&packet), Err(TsError::BadAdaptationField));
    }

    #[test]
    fn test_parse_pat() {
        let packet = pat(PMT_PID);
        let header = TsHeader::parse(&packet).unwrap();
        assert_eq!(header.pid, PAT_PID);

        let programs = parse_pat(header.payload(&packet)).unwrap();
        assert_eq!(programs, vec![(1, PMT_PID)]);
    }

    #[test]
    fn test_parse_pmt() {
        let packet = pmt(&[(0x0F, AUDIO_PID), (0x1B, VIDEO_PID)]);
        let header = TsHeader::parse(&packet).unwrap();

        let streams = parse_pmt(header.payload(&packet)).unwrap();
        assert_eq!(
            streams,
            vec![
                PmtStream {
                    stream_type: StreamType::Audio(0x0F),
                    pid: AUDIO_PID
                },
                PmtStream {
                    stream_type: StreamType::H264,
                    pid: VIDEO_PID
                },
            ]
        );
    }

    #[test]
    fn test_table_id_mismatch() {
        let packet = pmt(&[(0x1B, VIDEO_PID)]);
        let header = TsHeader::parse(&packet).unwrap();
        assert_eq!(
            parse_pat(header.payload(&packet)),
            Err(TsError::UnexpectedTable(TABLE_ID_PMT))
        );
    }

    #[test]
    fn test_truncated_section() {
        assert_eq!(parse_pat(&[]), Err(TsError::TruncatedSection));
        assert_eq!(parse_pat(&[0x00, 0x00, 0xB0]), Err(TsError::TruncatedSection));
        // Section length larger than the data
        assert_eq!(
            parse_pat(&[0x00, 0x00, 0xB0, 0xFF, 0x00, 0x01]),
            Err(TsError::TruncatedSection)
        );
    }

    #[test]
    fn test_section_span() {
        let packet = pat(PMT_PID);
        let header = TsHeader::parse(&packet).unwrap();
        // pointer (1) + table header (3) + section_length (13)
        assert_eq!(section_span(header.payload(&packet)), Ok(Some(17)));

        assert_eq!(section_span(&[]), Ok(None));
        assert_eq!(section_span(&[0x00, 0x02, 0xB0]), Ok(None));
        // Pointer field skips past the available bytes
        assert_eq!(section_span(&[0x05, 0x00, 0x02]), Ok(None));
        assert_eq!(
            section_span(&[0x00, 0x02, 0xB3, 0xFF]),
            Err(TsError::SectionTooLong(0x3FF))
        );
    }

    #[test]
    fn test_parse_pmt_across_packets() {
        let packets = long_pmt(&[(0x0F, AUDIO_PID), (0x1B, VIDEO_PID)], 200);
        assert_eq!(packets.len(), 2);

        let first = TsHeader::parse(&packets[0]).unwrap();
        assert_eq!(
            parse_pmt(first.payload(&packets[0])),
            Err(TsError::TruncatedSection)
        );

        let mut payload = first.payload(&packets[0]).to_vec();
        let second = TsHeader::parse(&packets[1]).unwrap();
        assert!(!second.pusi);
        payload.extend_from_slice(second.payload(&packets[1]));

        let span = section_span(&payload).unwrap().unwrap();
        assert!(span > TS_PACKET_SIZE - 4 && span <= payload.len());
        let streams = parse_pmt(&payload).unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[1].pid, VIDEO_PID);
    }

    #[test]
    fn test_pes_payload() {
        let packet = pes_start(VIDEO_PID, &h264_keyframe());
        let header = TsHeader::parse(&packet).unwrap();
        let es = pes_payload(header.payload(&packet)).unwrap();
        assert!(es.starts_with(&h264_keyframe()));

        assert_eq!(pes_payload(&[0xFF; 20]), Err(TsError::NotPes));
    }

    #[test]
    fn test_stream_type_classification() {
        assert!(StreamType::from_byte(0x1B).is_video());
        assert!(StreamType::from_byte(0x24).is_video());
        assert!(StreamType::from_byte(0x02).is_video());
        assert!(!StreamType::from_byte(0x0F).is_video());
        assert_eq!(StreamType::from_byte(0x06), StreamType::Other(0x06));
    }
}
