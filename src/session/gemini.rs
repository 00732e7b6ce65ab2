//! # Gemini Live Client
//!
//! WebSocket client for Google's Gemini Live API (`BidiGenerateContent`).
//!
//! ## Protocol:
//! 1. **Connect**: open a WebSocket to the endpoint with the API key in the query
//! 2. **Setup**: send the setup frame (model, voice, instructions, transcription)
//!    and wait for `setupComplete`
//! 3. **Stream**: audio goes out as `realtimeInput.mediaChunks`, text turns as
//!    `clientContent`; the server answers with `serverContent` frames
//! 4. **Close**: send a close frame
//!
//! The server sends JSON in binary frames as well as text frames; both are
//! parsed the same way.

use crate::config::GeminiConfig;
use crate::error::{BackendError, SessionError};
use crate::session::backend::{
    LiveConnection, LiveConnector, LiveSetup, ServerMessage, UsageMetadata,
};
use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

pub const GEMINI_LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// How long to wait for `setupComplete` after sending the setup frame.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Setup frame

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Enables transcription; the API takes an empty object.
#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {}

/// Build the first frame of a session.
pub fn build_setup_message(setup: &LiveSetup) -> SetupMessage {
    let model = if setup.model.starts_with("models/") {
        setup.model.clone()
    } else {
        format!("models/{}", setup.model)
    };

    let speech_config = if setup.voice.is_some() || setup.language.is_some() {
        Some(SpeechConfig {
            language_code: setup.language.clone(),
            voice_config: setup.voice.clone().map(|voice_name| VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
            }),
        })
    } else {
        None
    };

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config,
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: setup.system_instructions.clone(),
                }],
            },
            input_audio_transcription: setup.input_transcription.then_some(TranscriptionConfig {}),
            output_audio_transcription: setup.output_transcription.then_some(TranscriptionConfig {}),
        },
    }
}

/// `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=N", "data": "<base64>"}]}}`
pub fn build_audio_message(pcm: &[u8], sample_rate: u32) -> Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": format!("audio/pcm;rate={}", sample_rate),
                "data": base64::engine::general_purpose::STANDARD.encode(pcm),
            }]
        }
    })
}

pub fn build_text_turn(text: &str) -> Value {
    json!({
        "clientContent": {
            "turns": [{
                "role": "user",
                "parts": [{ "text": text }]
            }],
            "turnComplete": true
        }
    })
}

/// Decode one JSON frame from the server.
///
/// A top-level `error` object becomes [`BackendError::Server`].
pub fn parse_server_message(text: &str) -> Result<ServerMessage, BackendError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| BackendError::Protocol(format!("invalid server frame: {}", e)))?;

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown server error");
        return Err(BackendError::Server(message.to_string()));
    }

    let mut message = ServerMessage {
        setup_complete: value.get("setupComplete").is_some(),
        ..Default::default()
    };

    if let Some(content) = value.get("serverContent") {
        message.turn_complete = content.get("turnComplete").and_then(Value::as_bool) == Some(true);
        message.interrupted = content.get("interrupted").and_then(Value::as_bool) == Some(true);

        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
            for part in parts {
                let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) else {
                    continue;
                };
                let audio = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| BackendError::Protocol(format!("invalid audio payload: {}", e)))?;
                message.audio.push(audio);
            }
        }

        message.input_transcription = transcription_text(content.get("inputTranscription"));
        message.output_transcription = transcription_text(content.get("outputTranscription"));
    }

    // Older servers put transcriptions at the top level.
    if message.input_transcription.is_none() {
        message.input_transcription = transcription_text(value.get("inputTranscription"));
    }
    if message.output_transcription.is_none() {
        message.output_transcription = transcription_text(value.get("outputTranscription"));
    }

    if let Some(usage) = value.get("usageMetadata") {
        message.usage = serde_json::from_value::<UsageMetadata>(usage.clone()).ok();
    }

    if let Some(go_away) = value.get("goAway") {
        let time_left = go_away
            .get("timeLeft")
            .and_then(Value::as_str)
            .unwrap_or_default();
        message.go_away = Some(time_left.to_string());
    }

    Ok(message)
}

fn transcription_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// JSON carried by a frame, if any.
fn frame_json(frame: &Message) -> Option<&str> {
    match frame {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

/// Opens Gemini Live sessions.
pub struct GeminiLiveConnector {
    api_key: String,
    endpoint: String,
    setup_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: GEMINI_LIVE_ENDPOINT.to_string(),
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    /// Fails when no API key is configured.
    pub fn from_config(config: &GeminiConfig) -> Result<Self, SessionError> {
        if config.api_key.trim().is_empty() {
            return Err(SessionError::MissingCredential("GOOGLE_API_KEY"));
        }

        let mut connector = Self::new(config.api_key.trim());
        if !config.endpoint.is_empty() {
            connector.endpoint = config.endpoint.clone();
        }
        connector.setup_timeout = Duration::from_secs(config.setup_timeout_secs.max(1));
        Ok(connector)
    }

    async fn wait_for_setup_complete(ws: &mut WsStream) -> Result<(), BackendError> {
        while let Some(frame) = ws.next().await {
            let frame = frame.map_err(|e| BackendError::Connect(e.to_string()))?;
            if let Message::Close(close) = &frame {
                return Err(BackendError::Connect(format!(
                    "connection closed before setup completed: {:?}",
                    close
                )));
            }
            let Some(text) = frame_json(&frame) else {
                continue;
            };
            if parse_server_message(text)?.setup_complete {
                return Ok(());
            }
        }
        Err(BackendError::Connect("stream ended before setup completed".to_string()))
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: &LiveSetup) -> Result<Arc<dyn LiveConnection>, BackendError> {
        info!("Connecting to Gemini Live with model {}", setup.model);

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;

        let setup_json = serde_json::to_string(&build_setup_message(setup))
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        debug!("Sending Gemini Live setup: {}", setup_json);
        ws.send(Message::Text(setup_json))
            .await
            .map_err(|e| BackendError::Send(e.to_string()))?;

        match tokio::time::timeout(self.setup_timeout, Self::wait_for_setup_complete(&mut ws)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendError::Connect(format!(
                    "setupComplete not received within {}s",
                    self.setup_timeout.as_secs()
                )))
            }
        }
        info!("Gemini Live setup complete");

        let (sink, stream) = ws.split();
        Ok(Arc::new(GeminiLiveConnection {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }))
    }
}

/// An open Gemini Live WebSocket, split so sends and receives do not contend.
pub struct GeminiLiveConnection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl GeminiLiveConnection {
    async fn send_json(&self, value: &Value) -> Result<(), BackendError> {
        let text = serde_json::to_string(value).map_err(|e| BackendError::Protocol(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| BackendError::Send(e.to_string()))
    }
}

#[async_trait]
impl LiveConnection for GeminiLiveConnection {
    async fn send_audio(&self, pcm: &[u8], sample_rate: u32) -> Result<(), BackendError> {
        trace!("Sending {} bytes of audio at {} Hz", pcm.len(), sample_rate);
        self.send_json(&build_audio_message(pcm, sample_rate)).await
    }

    async fn send_text_turn(&self, text: &str) -> Result<(), BackendError> {
        self.send_json(&build_text_turn(text)).await
    }

    async fn receive(&self) -> Result<Option<ServerMessage>, BackendError> {
        let mut stream = self.stream.lock().await;
        loop {
            let frame = match stream.next().await {
                None => return Ok(None),
                Some(Err(err)) => return Err(BackendError::Receive(err.to_string())),
                Some(Ok(frame)) => frame,
            };

            if let Message::Close(close) = &frame {
                debug!("Gemini Live closed the connection: {:?}", close);
                return Ok(None);
            }

            match frame_json(&frame) {
                Some(text) => {
                    let message = parse_server_message(text)?;
                    if !message.is_empty() {
                        return Ok(Some(message));
                    }
                }
                None => trace!("Ignoring non-JSON frame from Gemini Live"),
            }
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| BackendError::Send(e.to_string()))
    }
}
