//! # Live Call Bridge
//!
//! Bridges real-time telephony audio (G.711 over RTP) to a live speech-AI
//! backend and back.
//!
//! ## Modules:
//! - **audio**: G.711 transcoding, RTP framing, resampling
//! - **bridge**: participant contracts and the N-way media bridge
//! - **session**: the AI participant and its live backend client
//! - **telephony**: the RTP participant
//! - **call**: one telephony leg and one AI session wired together
//! - **config**, **error**, **state**, **health**, **handlers**: service plumbing

pub mod audio;
pub mod bridge;
pub mod call;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod session;
pub mod state;
pub mod telephony;

#[cfg(test)]
pub(crate) mod test_support;
