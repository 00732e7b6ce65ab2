//! # Audio Module
//!
//! Format handling for the media path between the telephony leg and the live
//! speech backend.
//!
//! ## Key Components:
//! - **Codec**: G.711 μ-law / A-law transcoding and PCM windowing
//! - **RTP**: packet parsing and outbound packetization
//! - **Resample**: sample rate conversion between legs
//!
//! ## Audio Format:
//! - **Bit Depth**: 16-bit PCM, little-endian, mono
//! - **Telephony leg**: 8 kHz, 20 ms packets
//! - **Backend input**: 16 kHz
//! - **Backend output**: 24 kHz

pub mod codec;
pub mod resample;
pub mod rtp;

/// Sample rate of the telephony leg (G.711).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Sample rate the backend expects for input audio.
pub const BACKEND_INPUT_RATE: u32 = 16_000;

/// Sample rate of audio produced by the backend.
pub const BACKEND_OUTPUT_RATE: u32 = 24_000;

/// Packetization interval on the telephony leg.
pub const PACKET_DURATION_MS: u32 = 20;

/// Samples per packet on the telephony leg (160 at 8 kHz / 20 ms).
pub const SAMPLES_PER_PACKET: u32 = TELEPHONY_SAMPLE_RATE * PACKET_DURATION_MS / 1000;
