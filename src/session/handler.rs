//! # AI Session Handler
//!
//! Connects one live speech-AI session to a media bridge as a participant.
//!
//! ## Audio Paths:
//! - **Outbound** (bridge -> AI): the bridge writes 8 kHz PCM into the handler's
//!   [`SessionAudioWriter`], which resamples to 16 kHz and sends it to the backend.
//!   The first chunk is preceded by a "Hello" text turn so the model speaks first.
//! - **Inbound** (AI -> bridge): the receive loop resamples 24 kHz model audio to
//!   8 kHz and broadcasts it under the handler's participant id.
//!
//! ## Lifecycle:
//! `Created -> Connecting -> Active -> Closing -> Closed`, forward only. A session
//! is never reconnected; once the backend stream ends the handler is spent.
//!
//! ## Shutdown:
//! [`SessionHandler::close`] is idempotent and runs its steps in a fixed order:
//! mark closed, stop the receive loop, wait for it (bounded), close the
//! connection, cancel in-flight backend calls, leave the bridge.

use crate::audio::resample::resample_pcm16;
use crate::audio::{BACKEND_INPUT_RATE, BACKEND_OUTPUT_RATE, TELEPHONY_SAMPLE_RATE};
use crate::bridge::{AudioSink, BaseParticipant, MediaBridge, MediaChunk};
use crate::config::GeminiConfig;
use crate::error::{BackendError, SessionError, SinkError};
use crate::session::backend::{LiveConnection, LiveConnector, LiveSetup, ServerMessage};
use crate::session::config::SessionConfig;
use crate::session::gemini::GeminiLiveConnector;
use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_MODEL: &str = "gemini-live-2.5-flash-preview";

/// Upper bound on waiting for the receive loop during `close`.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Text turn sent ahead of the first audio chunk.
pub const GREETING_TEXT: &str = "Hello";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

#[derive(Debug, Default)]
struct SessionCounters {
    audio_chunks_sent: AtomicU64,
    audio_bytes_sent: AtomicU64,
    audio_blobs_received: AtomicU64,
    turns_completed: AtomicU64,
    interruptions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub audio_chunks_sent: u64,
    /// Bytes sent after resampling.
    pub audio_bytes_sent: u64,
    pub audio_blobs_received: u64,
    pub turns_completed: u64,
    pub interruptions: u64,
}

/// State reachable from the writer, the receive loop and the handler.
struct SessionShared {
    id: String,
    connection: RwLock<Option<Arc<dyn LiveConnection>>>,
    /// Set once, never cleared.
    closed: AtomicBool,
    first_audio_sent: AtomicBool,
    state: Mutex<SessionState>,
    /// Cancelled when the session is torn down; aborts pending backend calls.
    backend_ctx: CancellationToken,
    counters: SessionCounters,
}

impl SessionShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Move the state forward; backwards transitions are ignored.
    fn advance(&self, next: SessionState) {
        let mut state = self.state.lock();
        if next > *state {
            debug!("Session {} state {} -> {}", self.id, state.as_str(), next.as_str());
            *state = next;
        }
    }

    fn take_connection(&self) -> Option<Arc<dyn LiveConnection>> {
        self.connection.write().take()
    }

    /// Run a backend call unless the session is torn down first.
    async fn backend_call<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        tokio::select! {
            _ = self.backend_ctx.cancelled() => Err(BackendError::Cancelled),
            result = call => result,
        }
    }
}

/// Sink the bridge writes caller audio into.
pub struct SessionAudioWriter {
    shared: Arc<SessionShared>,
}

#[async_trait]
impl AudioSink for SessionAudioWriter {
    async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(SinkError::Closed);
        }
        let connection = shared.connection.read().clone();
        let Some(connection) = connection else {
            return Err(SinkError::Closed);
        };

        if data.is_empty() {
            warn!("Session {} received an empty audio chunk", shared.id);
            return Ok(0);
        }

        if !shared.first_audio_sent.swap(true, Ordering::AcqRel) {
            info!("Session {} received first audio, sending greeting", shared.id);
            if let Err(err) = shared
                .backend_call(connection.send_text_turn(GREETING_TEXT))
                .await
            {
                warn!("Session {} failed to send greeting: {}", shared.id, err);
            }
        }

        let pcm = resample_pcm16(data, TELEPHONY_SAMPLE_RATE, BACKEND_INPUT_RATE).map_err(|e| {
            error!("Session {} failed to resample outbound audio: {}", shared.id, e);
            SinkError::Write(e.to_string())
        })?;

        shared
            .backend_call(connection.send_audio(&pcm, BACKEND_INPUT_RATE))
            .await
            .map_err(|e| {
                error!("Session {} failed to send audio: {}", shared.id, e);
                SinkError::Write(e.to_string())
            })?;

        shared.counters.audio_chunks_sent.fetch_add(1, Ordering::Relaxed);
        shared
            .counters
            .audio_bytes_sent
            .fetch_add(pcm.len() as u64, Ordering::Relaxed);
        trace!("Session {} sent {} bytes of audio", shared.id, pcm.len());
        Ok(data.len())
    }
}

/// The AI side of a call.
pub struct SessionHandler {
    shared: Arc<SessionShared>,
    bridge: Arc<MediaBridge>,
    connector: Arc<dyn LiveConnector>,
    setup: LiveSetup,
    started: AtomicBool,
    close_requested: AtomicBool,
    stop: CancellationToken,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandler {
    /// Create the handler and register it with `bridge` under `participant_id`.
    ///
    /// Until [`start`](Self::start) succeeds, writes from the bridge fail with
    /// `SinkError::Closed`.
    pub fn new(
        bridge: Arc<MediaBridge>,
        participant_id: impl Into<String>,
        config: Option<SessionConfig>,
        connector: Arc<dyn LiveConnector>,
    ) -> Self {
        let id = participant_id.into();
        let config = SessionConfig::resolve(config);

        let shared = Arc::new(SessionShared {
            id: id.clone(),
            connection: RwLock::new(None),
            closed: AtomicBool::new(false),
            first_audio_sent: AtomicBool::new(false),
            state: Mutex::new(SessionState::Created),
            backend_ctx: CancellationToken::new(),
            counters: SessionCounters::default(),
        });

        let writer = Arc::new(SessionAudioWriter {
            shared: shared.clone(),
        });
        bridge.add_participant(Arc::new(BaseParticipant::new(id, writer)));

        Self {
            shared,
            bridge,
            connector,
            setup: LiveSetup {
                model: DEFAULT_MODEL.to_string(),
                system_instructions: config.system_instructions,
                voice: config.voice,
                language: config.language,
                input_transcription: true,
                output_transcription: true,
            },
            started: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            stop: CancellationToken::new(),
            receive_task: Mutex::new(None),
        }
    }

    /// Handler backed by Gemini Live. Fails when no API key is configured.
    pub fn from_config(
        bridge: Arc<MediaBridge>,
        participant_id: impl Into<String>,
        config: Option<SessionConfig>,
        gemini: &GeminiConfig,
    ) -> Result<Self, SessionError> {
        let connector = GeminiLiveConnector::from_config(gemini)?;
        let handler = Self::new(bridge, participant_id, config, Arc::new(connector));
        Ok(handler.with_model(gemini.model.clone()))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.setup.model = model;
        }
        self
    }

    /// Connect to the backend and spawn the receive loop.
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyStarted);
        }
        if self.shared.is_closed() {
            return Err(SessionError::Closed);
        }

        self.shared.advance(SessionState::Connecting);
        info!(
            "Session {} connecting (model {}, voice {:?})",
            self.shared.id, self.setup.model, self.setup.voice
        );

        let connection = match self
            .shared
            .backend_call(self.connector.connect(&self.setup))
            .await
        {
            Ok(connection) => connection,
            Err(err) => {
                error!("Session {} failed to connect: {}", self.shared.id, err);
                self.shared.mark_closed();
                self.bridge.remove_participant(&self.shared.id);
                self.shared.advance(SessionState::Closed);
                return Err(err.into());
            }
        };

        // `close` marks closed before taking this lock, so checking the flag under
        // it means either `close` sees the stored connection or we see the flag.
        let stored = {
            let mut slot = self.shared.connection.write();
            if self.shared.is_closed() {
                false
            } else {
                *slot = Some(connection.clone());
                true
            }
        };
        if !stored {
            // Closed while connecting.
            if let Err(err) = connection.close().await {
                warn!("Session {} failed to close connection: {}", self.shared.id, err);
            }
            return Err(SessionError::Closed);
        }
        self.shared.advance(SessionState::Active);

        let task = tokio::spawn(receive_loop(
            self.shared.clone(),
            self.bridge.clone(),
            connection,
            self.stop.clone(),
        ));
        *self.receive_task.lock() = Some(task);

        info!("Session {} active", self.shared.id);
        Ok(())
    }

    /// Tear the session down. Safe to call any number of times.
    pub async fn close(&self) {
        if self.close_requested.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Closing session {}", self.shared.id);
        self.shared.mark_closed();
        self.shared.advance(SessionState::Closing);

        self.stop.cancel();

        let task = self.receive_task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(CLOSE_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Session {} receive loop failed: {}", self.shared.id, err),
                Err(_) => warn!(
                    "Session {} receive loop did not stop within {}s",
                    self.shared.id,
                    CLOSE_TIMEOUT.as_secs()
                ),
            }
        }

        if let Some(connection) = self.shared.take_connection() {
            if let Err(err) = connection.close().await {
                warn!("Session {} failed to close connection: {}", self.shared.id, err);
            }
        }

        self.shared.backend_ctx.cancel();
        self.bridge.remove_participant(&self.shared.id);
        self.shared.advance(SessionState::Closed);
        info!("Session {} closed", self.shared.id);
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn model(&self) -> &str {
        &self.setup.model
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.shared.counters;
        SessionStats {
            audio_chunks_sent: c.audio_chunks_sent.load(Ordering::Relaxed),
            audio_bytes_sent: c.audio_bytes_sent.load(Ordering::Relaxed),
            audio_blobs_received: c.audio_blobs_received.load(Ordering::Relaxed),
            turns_completed: c.turns_completed.load(Ordering::Relaxed),
            interruptions: c.interruptions.load(Ordering::Relaxed),
        }
    }
}

async fn receive_loop(
    shared: Arc<SessionShared>,
    bridge: Arc<MediaBridge>,
    connection: Arc<dyn LiveConnection>,
    stop: CancellationToken,
) {
    debug!("Session {} receive loop started", shared.id);
    loop {
        if shared.is_closed() {
            break;
        }

        let pulled = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            pulled = AssertUnwindSafe(connection.receive()).catch_unwind() => pulled,
        };

        let result = pulled.unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(BackendError::Panicked(reason))
        });

        match result {
            Ok(Some(message)) => handle_message(&shared, &bridge, message),
            Ok(None) => {
                info!("Session {} backend stream ended", shared.id);
                end_session(&shared, &bridge).await;
                break;
            }
            Err(err) => {
                error!("Session {} receive failed: {}", shared.id, err);
                end_session(&shared, &bridge).await;
                break;
            }
        }
    }
    debug!("Session {} receive loop exited", shared.id);
}

/// Cleanup after the backend ended the session on its own.
async fn end_session(shared: &SessionShared, bridge: &MediaBridge) {
    shared.mark_closed();
    if let Some(connection) = shared.take_connection() {
        if let Err(err) = connection.close().await {
            warn!("Session {} failed to close connection: {}", shared.id, err);
        }
    }
    bridge.remove_participant(&shared.id);
    shared.advance(SessionState::Closed);
}

fn handle_message(shared: &SessionShared, bridge: &MediaBridge, message: ServerMessage) {
    if message.interrupted {
        let flushed = bridge.flush_queues();
        shared.counters.interruptions.fetch_add(1, Ordering::Relaxed);
        info!(
            "Session {} interrupted by caller, flushed {} playback queues",
            shared.id, flushed
        );
    }

    for blob in message.audio {
        shared.counters.audio_blobs_received.fetch_add(1, Ordering::Relaxed);
        let pcm = match resample_pcm16(&blob, BACKEND_OUTPUT_RATE, TELEPHONY_SAMPLE_RATE) {
            Ok(pcm) => pcm,
            Err(err) => {
                error!("Session {} failed to resample model audio: {}", shared.id, err);
                continue;
            }
        };
        if pcm.is_empty() {
            continue;
        }
        if let Err(err) = bridge.broadcast(MediaChunk::new(pcm, shared.id.clone())) {
            warn!("Session {} could not broadcast model audio: {}", shared.id, err);
        }
    }

    if message.turn_complete {
        shared.counters.turns_completed.fetch_add(1, Ordering::Relaxed);
        debug!("Session {} model turn complete", shared.id);
    }
    if let Some(text) = &message.input_transcription {
        info!("Session {} caller said: {}", shared.id, text);
    }
    if let Some(text) = &message.output_transcription {
        info!("Session {} model said: {}", shared.id, text);
    }
    if let Some(usage) = &message.usage {
        debug!(
            "Session {} usage: prompt={} response={} total={}",
            shared.id, usage.prompt_token_count, usage.response_token_count, usage.total_token_count
        );
    }
    if let Some(time_left) = &message.go_away {
        warn!("Session {} backend going away (time left: {})", shared.id, time_left);
    }
    if message.setup_complete {
        debug!("Session {} setup acknowledged", shared.id);
    }
}
