//! # RTP Framing
//!
//! Parsing of inbound RTP packets and packetization of outbound G.711 audio.
//!
//! ## Header Layout (RFC 3550):
//! ```text
//!  0                   1                   2                   3
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! |                           timestamp                           |
//! |           synchronization source (SSRC) identifier            |
//! |            contributing source (CSRC) identifiers             |
//! ```
//! Followed by an optional header extension, the payload and optional padding.

use crate::audio::codec::Codec;
use crate::error::FrameError;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const RTP_VERSION: u8 = 2;

/// Fixed header size without CSRCs or extension.
pub const RTP_HEADER_LEN: usize = 12;

/// One parsed RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFrame {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// May be empty; an empty payload is a valid frame.
    pub payload: Vec<u8>,
}

/// Extract header fields and payload from an RTP packet.
pub fn extract_frame(packet: &[u8]) -> Result<RtpFrame, FrameError> {
    if packet.len() < RTP_HEADER_LEN {
        return Err(FrameError::TooShort {
            len: packet.len(),
            needed: RTP_HEADER_LEN,
        });
    }

    let mut cursor = Cursor::new(packet);
    let first = read_u8(&mut cursor, packet.len())?;
    let second = read_u8(&mut cursor, packet.len())?;

    let version = first >> 6;
    if version != RTP_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }

    let has_padding = first & 0x20 != 0;
    let has_extension = first & 0x10 != 0;
    let csrc_count = (first & 0x0F) as usize;

    let sequence_number = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| too_short(packet.len(), RTP_HEADER_LEN))?;
    let timestamp = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| too_short(packet.len(), RTP_HEADER_LEN))?;
    let ssrc = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| too_short(packet.len(), RTP_HEADER_LEN))?;

    let mut offset = RTP_HEADER_LEN + csrc_count * 4;
    if packet.len() < offset {
        return Err(too_short(packet.len(), offset));
    }

    if has_extension {
        if packet.len() < offset + 4 {
            return Err(too_short(packet.len(), offset + 4));
        }
        let extension_words = BigEndian::read_u16(&packet[offset + 2..offset + 4]) as usize;
        offset += 4 + extension_words * 4;
        if packet.len() < offset {
            return Err(too_short(packet.len(), offset));
        }
    }

    let mut end = packet.len();
    if has_padding {
        let available = end - offset;
        let padding = packet[end - 1] as usize;
        if padding == 0 || padding > available {
            return Err(FrameError::InvalidPadding { padding, available });
        }
        end -= padding;
    }

    Ok(RtpFrame {
        payload_type: second & 0x7F,
        marker: second & 0x80 != 0,
        sequence_number,
        timestamp,
        ssrc,
        payload: packet[offset..end].to_vec(),
    })
}

fn read_u8(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<u8, FrameError> {
    cursor.read_u8().map_err(|_| too_short(len, RTP_HEADER_LEN))
}

fn too_short(len: usize, needed: usize) -> FrameError {
    FrameError::TooShort { len, needed }
}

/// Builds outbound RTP packets for one media stream.
///
/// Sequence number, timestamp and SSRC start at random values. The clock keeps
/// advancing across silence through [`RtpPacketizer::skip`], and the first
/// packet after a gap carries the marker bit.
#[derive(Debug)]
pub struct RtpPacketizer {
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
    timestamp: u32,
    talkspurt_start: bool,
}

impl RtpPacketizer {
    pub fn new(codec: Codec) -> Self {
        let seed = uuid::Uuid::new_v4().as_u128();
        Self::with_initial_state(codec, seed as u32, (seed >> 32) as u16, (seed >> 64) as u32)
    }

    pub fn with_initial_state(codec: Codec, ssrc: u32, sequence_number: u16, timestamp: u32) -> Self {
        Self {
            payload_type: codec.payload_type(),
            ssrc,
            sequence_number,
            timestamp,
            talkspurt_start: true,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Wrap `payload` in an RTP header and advance the stream clock by `samples`.
    pub fn packetize(&mut self, payload: &[u8], samples: u32) -> Vec<u8> {
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
        let marker = if self.talkspurt_start { 0x80 } else { 0x00 };

        // Writes into a Vec cannot fail.
        let _ = packet.write_u8(RTP_VERSION << 6);
        let _ = packet.write_u8(marker | self.payload_type);
        let _ = packet.write_u16::<BigEndian>(self.sequence_number);
        let _ = packet.write_u32::<BigEndian>(self.timestamp);
        let _ = packet.write_u32::<BigEndian>(self.ssrc);
        packet.extend_from_slice(payload);

        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples);
        self.talkspurt_start = false;
        packet
    }

    /// Advance the clock over a tick where nothing was sent.
    pub fn skip(&mut self, samples: u32) {
        self.timestamp = self.timestamp.wrapping_add(samples);
        self.talkspurt_start = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(first: u8, second: u8) -> Vec<u8> {
        vec![first, second, 0x12, 0x34, 0x00, 0x00, 0x03, 0xE8, 0xDE, 0xAD, 0xBE, 0xEF]
    }

    #[test]
    fn test_extract_frame_fields() {
        let mut packet = header(0x80, 0x80);
        packet.extend_from_slice(&[0xFF; 160]);

        let frame = extract_frame(&packet).unwrap();
        assert_eq!(frame.payload_type, 0);
        assert!(frame.marker);
        assert_eq!(frame.sequence_number, 0x1234);
        assert_eq!(frame.timestamp, 1000);
        assert_eq!(frame.ssrc, 0xDEADBEEF);
        assert_eq!(frame.payload.len(), 160);
    }

    #[test]
    fn test_zero_length_payload_is_valid() {
        let frame = extract_frame(&header(0x80, 8)).unwrap();
        assert_eq!(frame.payload_type, 8);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_malformed_packets_are_errors() {
        assert_eq!(
            extract_frame(&[0x80, 0x00, 0x00]),
            Err(FrameError::TooShort { len: 3, needed: RTP_HEADER_LEN })
        );
        assert_eq!(extract_frame(&header(0x40, 0)), Err(FrameError::UnsupportedVersion(1)));

        // Two CSRCs announced, none present.
        assert!(matches!(
            extract_frame(&header(0x82, 0)),
            Err(FrameError::TooShort { needed: 20, .. })
        ));

        // Extension bit without the extension header.
        assert!(matches!(extract_frame(&header(0x90, 0)), Err(FrameError::TooShort { .. })));

        // Padding count larger than the payload.
        let mut padded = header(0xA0, 0);
        padded.extend_from_slice(&[1, 2, 9]);
        assert_eq!(
            extract_frame(&padded),
            Err(FrameError::InvalidPadding { padding: 9, available: 3 })
        );
    }

    #[test]
    fn test_csrc_extension_and_padding_are_skipped() {
        let mut packet = header(0xB1, 0);
        packet.extend_from_slice(&[0, 0, 0, 1]); // one CSRC
        packet.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 1, 2, 3, 4]); // one-word extension
        packet.extend_from_slice(&[10, 20, 30]);
        packet.extend_from_slice(&[0, 2]); // two bytes of padding

        let frame = extract_frame(&packet).unwrap();
        assert_eq!(frame.payload, vec![10, 20, 30]);
    }

    #[test]
    fn test_packetizer_round_trips_through_parser() {
        let mut packetizer = RtpPacketizer::with_initial_state(Codec::Pcma, 7, u16::MAX, 100);

        let first = extract_frame(&packetizer.packetize(&[1; 160], 160)).unwrap();
        let second = extract_frame(&packetizer.packetize(&[2; 160], 160)).unwrap();

        assert_eq!(first.payload_type, 8);
        assert!(first.marker);
        assert!(!second.marker);
        assert_eq!(first.sequence_number, u16::MAX);
        assert_eq!(second.sequence_number, 0);
        assert_eq!(second.timestamp, 260);
        assert_eq!(second.ssrc, 7);
    }

    #[test]
    fn test_skip_advances_clock_and_marks_next_packet() {
        let mut packetizer = RtpPacketizer::with_initial_state(Codec::Pcmu, 1, 10, 0);
        packetizer.packetize(&[0xFF; 160], 160);
        packetizer.skip(160);

        let frame = extract_frame(&packetizer.packetize(&[0xFF; 160], 160)).unwrap();
        assert_eq!(frame.sequence_number, 11);
        assert_eq!(frame.timestamp, 320);
        assert!(frame.marker);
    }
}
