//! Participant contracts for the media bridge.
//!
//! A participant is anything that can receive audio: the telephony leg, the AI
//! session, a recorder. The bridge only ever sees these traits.

use crate::error::SinkError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Destination for audio delivered by the bridge.
///
/// Writes for one participant are issued sequentially by the fan-out worker, so
/// implementations do not need to handle concurrent writes from the bridge.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Deliver one chunk of 16-bit PCM. Returning [`SinkError::Closed`] removes
    /// the participant from the bridge.
    async fn write(&self, data: &[u8]) -> Result<usize, SinkError>;
}

/// Optional capability: discard audio queued for playback (barge-in).
pub trait QueueFlusher: Send + Sync {
    fn flush_queue(&self);
}

/// An endpoint registered with a [`MediaBridge`](super::MediaBridge).
pub trait Participant: Send + Sync {
    fn id(&self) -> &str;

    /// Current audio sink, if one is bound.
    fn writer(&self) -> Option<Arc<dyn AudioSink>>;

    /// Flush capability, for participants that buffer outbound audio.
    fn as_flusher(&self) -> Option<&dyn QueueFlusher> {
        None
    }
}

/// Participant with a rebindable writer and no flush capability.
pub struct BaseParticipant {
    id: String,
    writer: RwLock<Option<Arc<dyn AudioSink>>>,
}

impl BaseParticipant {
    pub fn new(id: impl Into<String>, writer: Arc<dyn AudioSink>) -> Self {
        Self {
            id: id.into(),
            writer: RwLock::new(Some(writer)),
        }
    }

    /// A participant that receives nothing until a writer is bound.
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            writer: RwLock::new(None),
        }
    }

    pub fn set_writer(&self, writer: Arc<dyn AudioSink>) {
        *self.writer.write() = Some(writer);
    }

    pub fn clear_writer(&self) {
        *self.writer.write() = None;
    }
}

impl Participant for BaseParticipant {
    fn id(&self) -> &str {
        &self.id
    }

    fn writer(&self) -> Option<Arc<dyn AudioSink>> {
        self.writer.read().clone()
    }
}

impl std::fmt::Debug for BaseParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseParticipant")
            .field("id", &self.id)
            .field("has_writer", &self.writer.read().is_some())
            .finish()
    }
}
