//! Contract between a session handler and a live speech backend.
//!
//! The handler only talks to these traits; [`super::gemini`] provides the
//! production implementation over WebSocket.

use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything needed to open a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSetup {
    pub model: String,
    pub system_instructions: String,
    pub voice: Option<String>,
    pub language: Option<String>,
    /// Ask the backend to transcribe the caller's audio.
    pub input_transcription: bool,
    /// Ask the backend to transcribe its own spoken responses.
    pub output_transcription: bool,
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub response_token_count: u64,
    #[serde(default)]
    pub total_token_count: u64,
}

/// One decoded message from the backend. Several fields may be set at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Raw 16-bit PCM blobs at the backend output rate.
    pub audio: Vec<Vec<u8>>,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub turn_complete: bool,
    /// The caller started talking over the model; queued playback is stale.
    pub interrupted: bool,
    pub setup_complete: bool,
    pub usage: Option<UsageMetadata>,
    /// The backend is about to drop the connection; holds the time left if given.
    pub go_away: Option<String>,
}

impl ServerMessage {
    pub fn audio(data: Vec<u8>) -> Self {
        Self {
            audio: vec![data],
            ..Default::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Opens live sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: &LiveSetup) -> Result<Arc<dyn LiveConnection>, BackendError>;
}

/// An open live session.
///
/// `receive` is only called from one task at a time, but may run concurrently
/// with the send methods.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Send 16-bit mono PCM recorded at `sample_rate`.
    async fn send_audio(&self, pcm: &[u8], sample_rate: u32) -> Result<(), BackendError>;

    /// Send a complete user text turn.
    async fn send_text_turn(&self, text: &str) -> Result<(), BackendError>;

    /// Next message from the backend; `Ok(None)` once the stream has ended.
    async fn receive(&self) -> Result<Option<ServerMessage>, BackendError>;

    async fn close(&self) -> Result<(), BackendError>;
}
