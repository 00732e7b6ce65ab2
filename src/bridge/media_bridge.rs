//! # Media Bridge
//!
//! N-way audio fan-out between participants of one call.
//!
//! ## Data Flow:
//! ```text
//! broadcast() --try_send--> [bounded queue, 200] --recv--> worker --write--> every other participant
//! ```
//!
//! ## Behaviour:
//! - **Non-blocking producers**: `broadcast` never waits. When the queue is full
//!   the incoming chunk is dropped and counted.
//! - **Single worker**: chunks are delivered in FIFO order, one chunk at a time,
//!   to each participant in turn. A slow sink delays the others.
//! - **Failure isolation**: a sink reporting `SinkError::Closed` is removed after
//!   the pass over the snapshot; any other write error is logged and ignored.
//! - **Snapshots**: the registry lock is never held across a write.

use crate::bridge::participant::Participant;
use crate::error::BridgeError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Capacity of the chunk queue between producers and the fan-out worker.
pub const CHUNK_QUEUE_CAPACITY: usize = 200;

/// One unit of audio travelling through the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub data: Vec<u8>,
    /// Participant that produced the chunk; it is never echoed back to them.
    pub sender_id: String,
}

impl MediaChunk {
    pub fn new(data: Vec<u8>, sender_id: impl Into<String>) -> Self {
        Self {
            data,
            sender_id: sender_id.into(),
        }
    }
}

#[derive(Debug, Default)]
struct BridgeCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    write_errors: AtomicU64,
    auto_removed: AtomicU64,
    removed: AtomicU64,
}

/// Point-in-time view of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub enqueued: u64,
    /// Chunks discarded because the queue was full.
    pub dropped: u64,
    /// Successful participant writes.
    pub delivered: u64,
    /// Non-terminal write failures.
    pub write_errors: u64,
    /// Participants removed after a terminal write failure.
    pub auto_removed: u64,
    /// Participants removed through `remove_participant`.
    pub removed: u64,
}

type Registry = RwLock<HashMap<String, Arc<dyn Participant>>>;

/// State shared with the fan-out worker.
struct BridgeShared {
    participants: Registry,
    counters: BridgeCounters,
}

struct Running {
    tx: mpsc::Sender<MediaChunk>,
    stop: CancellationToken,
    worker: JoinHandle<()>,
}

pub struct MediaBridge {
    shared: Arc<BridgeShared>,
    running: Mutex<Option<Running>>,
    queue_capacity: usize,
}

impl MediaBridge {
    pub fn new() -> Self {
        Self::with_capacity(CHUNK_QUEUE_CAPACITY)
    }

    /// Bridge with a custom queue capacity (at least one slot).
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(BridgeShared {
                participants: RwLock::new(HashMap::new()),
                counters: BridgeCounters::default(),
            }),
            running: Mutex::new(None),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a participant, replacing any existing entry with the same id.
    pub fn add_participant(&self, participant: Arc<dyn Participant>) {
        let id = participant.id().to_string();
        let replaced = self
            .shared
            .participants
            .write()
            .insert(id.clone(), participant)
            .is_some();

        if replaced {
            info!("Replaced participant {} in media bridge", id);
        } else {
            info!("Added participant {} to media bridge", id);
        }
    }

    /// Remove a participant by id. Returns whether anything was removed.
    pub fn remove_participant(&self, id: &str) -> bool {
        let removed = self.shared.participants.write().remove(id).is_some();
        if removed {
            self.shared.counters.removed.fetch_add(1, Ordering::Relaxed);
            info!("Removed participant {} from media bridge", id);
        }
        removed
    }

    /// Queue a chunk for delivery to every participant except its sender.
    ///
    /// Never blocks. A full queue drops `chunk` and still returns `Ok`.
    pub fn broadcast(&self, chunk: MediaChunk) -> Result<(), BridgeError> {
        let running = self.running.lock();
        let Some(running) = running.as_ref() else {
            return Err(BridgeError::Closed);
        };

        match running.tx.try_send(chunk) {
            Ok(()) => {
                self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(chunk)) => {
                let dropped = self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Media queue full, dropping {} byte chunk from {} ({} dropped so far)",
                    chunk.data.len(),
                    chunk.sender_id,
                    dropped
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BridgeError::Closed),
        }
    }

    /// Ask every participant that buffers playback to discard it.
    /// Returns how many participants were flushed.
    pub fn flush_queues(&self) -> usize {
        let mut flushed = 0;
        for participant in self.snapshot() {
            if let Some(flusher) = participant.as_flusher() {
                flusher.flush_queue();
                flushed += 1;
            }
        }
        debug!("Flushed playback queues of {} participants", flushed);
        flushed
    }

    /// Create the chunk queue and spawn the fan-out worker.
    pub fn start(&self) -> Result<(), BridgeError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let stop = CancellationToken::new();
        let worker = tokio::spawn(run_worker(self.shared.clone(), rx, stop.clone()));

        *running = Some(Running { tx, stop, worker });
        info!("Media bridge started (queue capacity {})", self.queue_capacity);
        Ok(())
    }

    /// Stop the worker, wait for it, and clear the registry. Idempotent.
    ///
    /// Chunks still queued when the stop signal arrives are discarded.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        running.stop.cancel();
        drop(running.tx);
        if let Err(err) = running.worker.await {
            warn!("Media bridge worker ended abnormally: {}", err);
        }

        self.shared.participants.write().clear();
        info!("Media bridge stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn participant(&self, id: &str) -> Option<Arc<dyn Participant>> {
        self.shared.participants.read().get(id).cloned()
    }

    pub fn participant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.participants.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn participant_count(&self) -> usize {
        self.shared.participants.read().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.participants.read().contains_key(id)
    }

    pub fn stats(&self) -> BridgeStats {
        let c = &self.shared.counters;
        BridgeStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            write_errors: c.write_errors.load(Ordering::Relaxed),
            auto_removed: c.auto_removed.load(Ordering::Relaxed),
            removed: c.removed.load(Ordering::Relaxed),
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Participant>> {
        self.shared.snapshot()
    }
}

impl Default for MediaBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeShared {
    fn snapshot(&self) -> Vec<Arc<dyn Participant>> {
        self.participants.read().values().cloned().collect()
    }

    async fn fan_out(&self, chunk: MediaChunk) {
        let mut failed: Vec<Arc<dyn Participant>> = Vec::new();

        for participant in self.snapshot() {
            if participant.id() == chunk.sender_id {
                continue;
            }
            let Some(writer) = participant.writer() else {
                continue;
            };

            match writer.write(&chunk.data).await {
                Ok(written) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    trace!("Delivered {} bytes to {}", written, participant.id());
                }
                Err(err) if err.is_terminal() => {
                    warn!("Participant {} sink closed, removing: {}", participant.id(), err);
                    failed.push(participant);
                }
                Err(err) => {
                    self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Write to participant {} failed: {}", participant.id(), err);
                }
            }
        }

        if failed.is_empty() {
            return;
        }

        let mut registry = self.participants.write();
        for participant in failed {
            let id = participant.id();
            // Only remove the instance that failed, not a replacement added since.
            let same_instance = registry
                .get(id)
                .is_some_and(|current| same_participant(current, &participant));
            if same_instance {
                registry.remove(id);
                self.counters.auto_removed.fetch_add(1, Ordering::Relaxed);
                info!("Removed closed participant {} from media bridge", id);
            }
        }
    }
}

fn same_participant(a: &Arc<dyn Participant>, b: &Arc<dyn Participant>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

async fn run_worker(
    shared: Arc<BridgeShared>,
    mut rx: mpsc::Receiver<MediaChunk>,
    stop: CancellationToken,
) {
    debug!("Media bridge worker running");
    loop {
        let chunk = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            chunk = rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };
        shared.fan_out(chunk).await;
    }
    debug!("Media bridge worker exiting");
}
