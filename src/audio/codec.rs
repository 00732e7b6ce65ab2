//! # G.711 Transcoding
//!
//! Converts between the two telephony companding codecs and 16-bit linear PCM,
//! and slices PCM into fixed-duration windows for packetization.
//!
//! ## Formats:
//! - **Linear PCM**: 16-bit signed, little-endian, mono
//! - **PCMU**: G.711 μ-law, RTP payload type 0
//! - **PCMA**: G.711 A-law, RTP payload type 8
//!
//! One companded byte always corresponds to one 16-bit sample, so a 20 ms packet
//! at 8 kHz is 160 encoded bytes or 320 PCM bytes.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// μ-law bias added before segment search.
const ULAW_BIAS: i32 = 0x84;

/// Largest magnitude μ-law can represent once the bias is added.
const ULAW_CLIP: i32 = 32635;

/// Upper bound of each A-law segment (13-bit magnitude).
const ALAW_SEGMENT_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// Telephony codec negotiated for the RTP leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Codec {
    Pcmu,
    Pcma,
}

impl Codec {
    /// Static RTP payload type for this codec.
    pub fn payload_type(self) -> u8 {
        match self {
            Codec::Pcmu => 0,
            Codec::Pcma => 8,
        }
    }

    pub fn from_payload_type(payload_type: u8) -> Option<Self> {
        match payload_type {
            0 => Some(Codec::Pcmu),
            8 => Some(Codec::Pcma),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Pcmu => "PCMU",
            Codec::Pcma => "PCMA",
        }
    }

    /// Expand companded bytes into 16-bit little-endian PCM.
    pub fn decode(self, payload: &[u8]) -> Vec<u8> {
        let mut pcm = vec![0u8; payload.len() * 2];
        for (byte, out) in payload.iter().zip(pcm.chunks_exact_mut(2)) {
            let sample = match self {
                Codec::Pcmu => ulaw_to_linear(*byte),
                Codec::Pcma => alaw_to_linear(*byte),
            };
            LittleEndian::write_i16(out, sample);
        }
        pcm
    }

    /// Compress 16-bit little-endian PCM. A trailing odd byte is ignored.
    pub fn encode(self, pcm: &[u8]) -> Vec<u8> {
        pcm.chunks_exact(2)
            .map(|bytes| {
                let sample = LittleEndian::read_i16(bytes);
                match self {
                    Codec::Pcmu => linear_to_ulaw(sample),
                    Codec::Pcma => linear_to_alaw(sample),
                }
            })
            .collect()
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PCMU" => Ok(Codec::Pcmu),
            "PCMA" => Ok(Codec::Pcma),
            other => Err(format!("unsupported codec '{}'", other)),
        }
    }
}

/// Decode a G.711 payload named by codec string.
///
/// An unsupported codec name yields an empty buffer rather than an error, so
/// callers must check codec support before relying on the output length.
pub fn decode(payload: &[u8], codec: &str) -> Vec<u8> {
    match codec.parse::<Codec>() {
        Ok(codec) => codec.decode(payload),
        Err(_) => Vec::new(),
    }
}

/// Encode 16-bit PCM with the named codec; unsupported names yield an empty buffer.
pub fn encode(pcm: &[u8], codec: &str) -> Vec<u8> {
    match codec.parse::<Codec>() {
        Ok(codec) => codec.encode(pcm),
        Err(_) => Vec::new(),
    }
}

/// Split 16-bit PCM into windows of `duration_ms` at `sample_rate`.
///
/// The window is `sample_rate * 2 * duration_ms / 1000` bytes. The last slice
/// holds whatever remains, and concatenating the slices gives back `pcm`.
pub fn split_into_chunks(pcm: &[u8], sample_rate: u32, duration_ms: u32) -> Vec<Vec<u8>> {
    if pcm.is_empty() {
        return Vec::new();
    }

    let bytes_per_chunk = (sample_rate as usize * 2 * duration_ms as usize) / 1000;
    if bytes_per_chunk == 0 {
        return vec![pcm.to_vec()];
    }

    pcm.chunks(bytes_per_chunk).map(<[u8]>::to_vec).collect()
}

fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    magnitude = magnitude.min(ULAW_CLIP) + ULAW_BIAS;

    // Segment is the position of the highest set bit above bit 7.
    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) | mantissa) as u8
}

fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = (byte & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

fn linear_to_alaw(sample: i16) -> u8 {
    let mut magnitude = (sample as i32) >> 3;
    let mask = if magnitude >= 0 {
        0xD5
    } else {
        magnitude = -magnitude - 1;
        0x55
    };

    let segment = ALAW_SEGMENT_END
        .iter()
        .position(|&end| magnitude <= end)
        .unwrap_or(ALAW_SEGMENT_END.len());

    if segment >= ALAW_SEGMENT_END.len() {
        return (0x7F ^ mask) as u8;
    }

    let step = if segment < 2 { 1 } else { segment };
    let value = ((segment as i32) << 4) | ((magnitude >> step) & 0x0F);
    (value ^ mask) as u8
}

fn alaw_to_linear(byte: u8) -> i16 {
    let byte = byte ^ 0x55;
    let segment = ((byte & 0x70) >> 4) as i32;
    let mut magnitude = ((byte & 0x0F) as i32) << 4;

    match segment {
        0 => magnitude += 8,
        1 => magnitude += 0x108,
        _ => {
            magnitude += 0x108;
            magnitude <<= segment - 1;
        }
    }

    if byte & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}
