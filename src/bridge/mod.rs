//! # Media Bridge Module
//!
//! Routes audio between the participants of a call.
//!
//! ## Key Components:
//! - **Participant**: capability contracts (`AudioSink`, `QueueFlusher`) and a
//!   basic participant with a rebindable writer
//! - **MediaBridge**: participant registry, bounded chunk queue and fan-out worker

pub mod media_bridge;
pub mod participant;

pub use media_bridge::{BridgeStats, MediaBridge, MediaChunk, CHUNK_QUEUE_CAPACITY};
pub use participant::{AudioSink, BaseParticipant, Participant, QueueFlusher};
