//! # AI Session Module
//!
//! The speech-AI participant of a call.
//!
//! ## Key Components:
//! - **SessionConfig**: instructions, voice and language for one session
//! - **Backend**: the connector/connection contract a live backend implements
//! - **Gemini**: the Gemini Live WebSocket backend
//! - **SessionHandler**: joins a live session to a media bridge

pub mod backend;
pub mod config;
pub mod gemini;
pub mod handler;

pub use backend::{LiveConnection, LiveConnector, LiveSetup, ServerMessage, UsageMetadata};
pub use config::SessionConfig;
pub use gemini::GeminiLiveConnector;
pub use handler::{SessionHandler, SessionState, SessionStats};
