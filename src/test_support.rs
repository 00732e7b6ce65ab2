//! Fakes shared by unit tests across modules.

use crate::bridge::{AudioSink, Participant, QueueFlusher};
use crate::error::{BackendError, SinkError};
use crate::session::backend::{LiveConnection, LiveConnector, LiveSetup, ServerMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Records every chunk it is given.
#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().clone()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        self.chunks.lock().push(data.to_vec());
        Ok(data.len())
    }
}

/// Always reports a terminal failure.
pub struct ClosedSink;

#[async_trait]
impl AudioSink for ClosedSink {
    async fn write(&self, _data: &[u8]) -> Result<usize, SinkError> {
        Err(SinkError::Closed)
    }
}

/// Always reports a transient failure.
pub struct FailingSink;

#[async_trait]
impl AudioSink for FailingSink {
    async fn write(&self, _data: &[u8]) -> Result<usize, SinkError> {
        Err(SinkError::Write("device busy".to_string()))
    }
}

/// Blocks every write until [`GatedSink::open`] is called.
pub struct GatedSink {
    gate: watch::Sender<bool>,
    entered: AtomicUsize,
    chunks: Mutex<Vec<Vec<u8>>>,
    close_on_release: bool,
}

impl Default for GatedSink {
    fn default() -> Self {
        Self {
            gate: watch::channel(false).0,
            entered: AtomicUsize::new(0),
            chunks: Mutex::new(Vec::new()),
            close_on_release: false,
        }
    }
}

impl GatedSink {
    /// A gated sink whose writes fail with `SinkError::Closed` once released.
    pub fn closing() -> Self {
        Self {
            close_on_release: true,
            ..Self::default()
        }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    /// Number of writes that have started.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().clone()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }
}

#[async_trait]
impl AudioSink for GatedSink {
    async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        self.chunks.lock().push(data.to_vec());
        if self.close_on_release {
            Err(SinkError::Closed)
        } else {
            Ok(data.len())
        }
    }
}

/// Participant with a recording writer and a flush counter.
pub struct FlushingParticipant {
    id: String,
    sink: Arc<RecordingSink>,
    flushes: AtomicUsize,
}

impl FlushingParticipant {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            sink: Arc::new(RecordingSink::default()),
            flushes: AtomicUsize::new(0),
        }
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> Arc<RecordingSink> {
        self.sink.clone()
    }
}

impl Participant for FlushingParticipant {
    fn id(&self) -> &str {
        &self.id
    }

    fn writer(&self) -> Option<Arc<dyn AudioSink>> {
        Some(self.sink.clone())
    }

    fn as_flusher(&self) -> Option<&dyn QueueFlusher> {
        Some(self)
    }
}

impl QueueFlusher for FlushingParticipant {
    fn flush_queue(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

/// One scripted reaction of [`ScriptedConnection::receive`].
pub enum Step {
    Message(ServerMessage),
    End,
    Fail(BackendError),
    Panic,
}

/// Live connection that replays a script and records what it was sent.
///
/// Once the script is exhausted `receive` waits forever.
#[derive(Default)]
pub struct ScriptedConnection {
    script: Mutex<VecDeque<Step>>,
    sent_audio: Mutex<Vec<(Vec<u8>, u32)>>,
    sent_text: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    hang_on_close: bool,
}

impl ScriptedConnection {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    /// Like [`ScriptedConnection::new`], but `close` never completes.
    pub fn with_hanging_close(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            hang_on_close: true,
            ..Self::default()
        })
    }

    pub fn sent_audio(&self) -> Vec<(Vec<u8>, u32)> {
        self.sent_audio.lock().clone()
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent_text.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveConnection for ScriptedConnection {
    async fn send_audio(&self, pcm: &[u8], sample_rate: u32) -> Result<(), BackendError> {
        self.sent_audio.lock().push((pcm.to_vec(), sample_rate));
        Ok(())
    }

    async fn send_text_turn(&self, text: &str) -> Result<(), BackendError> {
        self.sent_text.lock().push(text.to_string());
        Ok(())
    }

    async fn receive(&self) -> Result<Option<ServerMessage>, BackendError> {
        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Message(message)) => Ok(Some(message)),
            Some(Step::End) => Ok(None),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Panic) => panic!("scripted backend panic"),
            None => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Connector handing out one scripted connection.
pub struct ScriptedConnector {
    connection: Arc<ScriptedConnection>,
    setups: Mutex<Vec<LiveSetup>>,
    fail: bool,
}

impl ScriptedConnector {
    pub fn new(connection: Arc<ScriptedConnection>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            setups: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            connection: ScriptedConnection::new(Vec::new()),
            setups: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn setups(&self) -> Vec<LiveSetup> {
        self.setups.lock().clone()
    }
}

#[async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(&self, setup: &LiveSetup) -> Result<Arc<dyn LiveConnection>, BackendError> {
        self.setups.lock().push(setup.clone());
        if self.fail {
            return Err(BackendError::Connect("connection refused".to_string()));
        }
        Ok(self.connection.clone())
    }
}
