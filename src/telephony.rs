//! # Telephony Participant
//!
//! The phone side of a call: a G.711 RTP stream on a UDP socket.
//!
//! ## Data Flow:
//! ```text
//! bridge --write--> RtpOutbound (encode, 20 ms frames) --pacer, every 20 ms--> UDP
//! UDP --receiver--> extract_frame --> decode --> bridge.broadcast
//! ```
//!
//! Outbound audio is queued and released at the packet rate so the far end
//! receives a steady stream even when the AI produces audio in bursts. The queue
//! is what barge-in flushes.

use crate::audio::codec::{split_into_chunks, Codec};
use crate::audio::rtp::{extract_frame, RtpPacketizer};
use crate::audio::{PACKET_DURATION_MS, SAMPLES_PER_PACKET, TELEPHONY_SAMPLE_RATE};
use crate::bridge::{AudioSink, MediaBridge, MediaChunk, Participant, QueueFlusher};
use crate::error::{BridgeError, SinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Ten seconds of audio at 20 ms per frame.
pub const DEFAULT_MAX_OUTBOUND_FRAMES: usize = 500;

/// Large enough for any RTP packet on a standard MTU.
const RECV_BUFFER_LEN: usize = 2048;

/// A negotiated RTP media stream.
#[derive(Debug, Clone)]
pub struct RtpEndpoint {
    pub socket: Arc<UdpSocket>,
    pub remote: SocketAddr,
    pub codec: Codec,
}

#[derive(Debug, Default)]
struct TelephonyCounters {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    malformed_packets: AtomicU64,
    frames_dropped: AtomicU64,
    frames_flushed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelephonyStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub malformed_packets: u64,
    /// Oldest frames discarded because the outbound queue was full.
    pub frames_dropped: u64,
    /// Frames discarded by barge-in flushes.
    pub frames_flushed: u64,
    pub queued_frames: usize,
}

/// Outbound half: encodes bridge audio into frames waiting for the pacer.
pub struct RtpOutbound {
    codec: Codec,
    frames: Mutex<VecDeque<Vec<u8>>>,
    max_frames: usize,
    closed: AtomicBool,
    counters: Arc<TelephonyCounters>,
}

impl RtpOutbound {
    fn pop_frame(&self) -> Option<Vec<u8>> {
        self.frames.lock().pop_front()
    }

    fn flush(&self) -> usize {
        let flushed = {
            let mut frames = self.frames.lock();
            let count = frames.len();
            frames.clear();
            count
        };
        self.counters
            .frames_flushed
            .fetch_add(flushed as u64, Ordering::Relaxed);
        flushed
    }

    fn queued(&self) -> usize {
        self.frames.lock().len()
    }
}

#[async_trait]
impl AudioSink for RtpOutbound {
    async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }

        let encoded: Vec<Vec<u8>> = split_into_chunks(data, TELEPHONY_SAMPLE_RATE, PACKET_DURATION_MS)
            .iter()
            .map(|chunk| self.codec.encode(chunk))
            .filter(|frame| !frame.is_empty())
            .collect();

        let mut dropped = 0;
        {
            let mut frames = self.frames.lock();
            frames.extend(encoded);
            while frames.len() > self.max_frames {
                frames.pop_front();
                dropped += 1;
            }
        }

        if dropped > 0 {
            self.counters.frames_dropped.fetch_add(dropped, Ordering::Relaxed);
            warn!("Outbound RTP queue full, dropped {} oldest frames", dropped);
        }
        Ok(data.len())
    }
}

/// Telephony leg of a call, registered with the bridge like any participant.
pub struct RtpParticipant {
    id: String,
    endpoint: RtpEndpoint,
    outbound: Arc<RtpOutbound>,
    counters: Arc<TelephonyCounters>,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RtpParticipant {
    pub fn new(id: impl Into<String>, endpoint: RtpEndpoint, max_outbound_frames: usize) -> Self {
        let counters = Arc::new(TelephonyCounters::default());
        let outbound = Arc::new(RtpOutbound {
            codec: endpoint.codec,
            frames: Mutex::new(VecDeque::new()),
            max_frames: max_outbound_frames.max(1),
            closed: AtomicBool::new(false),
            counters: counters.clone(),
        });

        Self {
            id: id.into(),
            endpoint,
            outbound,
            counters,
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the pacer and receiver tasks. Calling it again does nothing.
    pub fn start(&self, bridge: Arc<MediaBridge>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.stop.is_cancelled() {
            warn!("Telephony participant {} already started", self.id);
            return;
        }

        tasks.push(tokio::spawn(run_pacer(
            self.id.clone(),
            self.endpoint.clone(),
            self.outbound.clone(),
            self.counters.clone(),
            self.stop.clone(),
        )));
        tasks.push(tokio::spawn(run_receiver(
            self.id.clone(),
            self.endpoint.clone(),
            bridge,
            self.counters.clone(),
            self.stop.clone(),
        )));

        info!(
            "Telephony participant {} streaming {} to {}",
            self.id, self.endpoint.codec, self.endpoint.remote
        );
    }

    /// Stop both tasks and refuse further audio. Idempotent.
    pub async fn stop(&self) {
        self.outbound.closed.store(true, Ordering::Release);
        self.stop.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!("Telephony task for {} ended abnormally: {}", self.id, err);
            }
        }
        self.outbound.flush();
        debug!("Telephony participant {} stopped", self.id);
    }

    pub fn codec(&self) -> Codec {
        self.endpoint.codec
    }

    pub fn remote(&self) -> SocketAddr {
        self.endpoint.remote
    }

    pub fn stats(&self) -> TelephonyStats {
        let c = &self.counters;
        TelephonyStats {
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            packets_received: c.packets_received.load(Ordering::Relaxed),
            malformed_packets: c.malformed_packets.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            frames_flushed: c.frames_flushed.load(Ordering::Relaxed),
            queued_frames: self.outbound.queued(),
        }
    }
}

impl Participant for RtpParticipant {
    fn id(&self) -> &str {
        &self.id
    }

    fn writer(&self) -> Option<Arc<dyn AudioSink>> {
        Some(self.outbound.clone())
    }

    fn as_flusher(&self) -> Option<&dyn QueueFlusher> {
        Some(self)
    }
}

impl QueueFlusher for RtpParticipant {
    fn flush_queue(&self) {
        let flushed = self.outbound.flush();
        debug!("Flushed {} queued frames for {}", flushed, self.id);
    }
}

async fn run_pacer(
    id: String,
    endpoint: RtpEndpoint,
    outbound: Arc<RtpOutbound>,
    counters: Arc<TelephonyCounters>,
    stop: CancellationToken,
) {
    let mut packetizer = RtpPacketizer::new(endpoint.codec);
    let mut ticker = tokio::time::interval(Duration::from_millis(PACKET_DURATION_MS as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!("RTP pacer for {} started (ssrc {:#010x})", id, packetizer.ssrc());

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(frame) = outbound.pop_frame() else {
            packetizer.skip(SAMPLES_PER_PACKET);
            continue;
        };

        // One G.711 byte per sample.
        let packet = packetizer.packetize(&frame, frame.len() as u32);
        match endpoint.socket.send_to(&packet, endpoint.remote).await {
            Ok(_) => {
                counters.packets_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => warn!("Failed to send RTP to {}: {}", endpoint.remote, err),
        }
    }
    debug!("RTP pacer for {} exiting", id);
}

async fn run_receiver(
    id: String,
    endpoint: RtpEndpoint,
    bridge: Arc<MediaBridge>,
    counters: Arc<TelephonyCounters>,
    stop: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    debug!("RTP receiver for {} started", id);

    loop {
        let (len, source) = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            received = endpoint.socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(err) => {
                    warn!("RTP receive error for {}: {}", id, err);
                    continue;
                }
            },
        };

        if source != endpoint.remote {
            trace!("Ignoring RTP from unexpected source {}", source);
            continue;
        }

        let frame = match extract_frame(&buf[..len]) {
            Ok(frame) => frame,
            Err(err) => {
                counters.malformed_packets.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping malformed RTP packet from {}: {}", source, err);
                continue;
            }
        };

        // Comfort noise, DTMF events and unknown payloads carry no speech.
        let Some(codec) = Codec::from_payload_type(frame.payload_type) else {
            trace!("Ignoring RTP payload type {}", frame.payload_type);
            continue;
        };
        if frame.payload.is_empty() {
            continue;
        }

        counters.packets_received.fetch_add(1, Ordering::Relaxed);
        match bridge.broadcast(MediaChunk::new(codec.decode(&frame.payload), id.clone())) {
            Ok(()) => {}
            Err(BridgeError::Closed) => {
                info!("Media bridge closed, RTP receiver for {} stopping", id);
                break;
            }
            Err(err) => warn!("Failed to broadcast caller audio: {}", err),
        }
    }
    debug!("RTP receiver for {} exiting", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BaseParticipant;
    use crate::test_support::{wait_until, RecordingSink};

    async fn socket_pair() -> (Arc<UdpSocket>, UdpSocket) {
        let local = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (Arc::new(local), peer)
    }

    async fn participant(max_frames: usize) -> (RtpParticipant, UdpSocket) {
        let (local, peer) = socket_pair().await;
        let endpoint = RtpEndpoint {
            socket: local,
            remote: peer.local_addr().unwrap(),
            codec: Codec::Pcmu,
        };
        (RtpParticipant::new("phone", endpoint, max_frames), peer)
    }

    #[tokio::test]
    async fn test_write_queues_one_frame_per_20ms() {
        let (phone, _peer) = participant(DEFAULT_MAX_OUTBOUND_FRAMES).await;
        let writer = phone.writer().unwrap();

        // 50 ms of audio: two full frames and a 10 ms tail.
        assert_eq!(writer.write(&vec![0u8; 800]).await, Ok(800));
        assert_eq!(phone.stats().queued_frames, 3);
        assert_eq!(phone.outbound.pop_frame().map(|f| f.len()), Some(160));
    }

    #[tokio::test]
    async fn test_flush_discards_queued_frames() {
        let (phone, _peer) = participant(DEFAULT_MAX_OUTBOUND_FRAMES).await;
        phone.writer().unwrap().write(&vec![0u8; 960]).await.unwrap();

        phone.as_flusher().unwrap().flush_queue();

        let stats = phone.stats();
        assert_eq!(stats.queued_frames, 0);
        assert_eq!(stats.frames_flushed, 3);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest_frames() {
        let (phone, _peer) = participant(2).await;
        let writer = phone.writer().unwrap();

        let mut pcm = Vec::new();
        for amplitude in [0i16, 1000, 2000] {
            for _ in 0..160 {
                pcm.extend_from_slice(&amplitude.to_le_bytes());
            }
        }
        writer.write(&pcm).await.unwrap();

        assert_eq!(phone.stats().frames_dropped, 1);
        let first = phone.outbound.pop_frame().unwrap();
        assert_eq!(first, Codec::Pcmu.encode(&pcm[320..640]));
    }

    #[tokio::test]
    async fn test_write_after_stop_is_terminal() {
        let (phone, _peer) = participant(DEFAULT_MAX_OUTBOUND_FRAMES).await;
        phone.stop().await;
        phone.stop().await;
        assert_eq!(
            phone.writer().unwrap().write(&[0, 0]).await,
            Err(SinkError::Closed)
        );
    }

    #[tokio::test]
    async fn test_received_rtp_is_broadcast_as_pcm() {
        let (phone, peer) = participant(DEFAULT_MAX_OUTBOUND_FRAMES).await;
        let phone_addr = phone.endpoint.socket.local_addr().unwrap();
        let phone = Arc::new(phone);

        let bridge = Arc::new(MediaBridge::new());
        let ai = Arc::new(RecordingSink::default());
        bridge.add_participant(phone.clone());
        bridge.add_participant(Arc::new(BaseParticipant::new("ai", ai.clone())));
        bridge.start().unwrap();
        phone.start(bridge.clone());

        let mut packetizer = RtpPacketizer::with_initial_state(Codec::Pcmu, 42, 1, 0);
        peer.send_to(&packetizer.packetize(&[0xFF; 160], 160), phone_addr)
            .await
            .unwrap();
        // Garbage is counted and skipped.
        peer.send_to(&[0x00, 0x01], phone_addr).await.unwrap();

        wait_until(|| ai.chunk_count() == 1).await;
        assert_eq!(ai.chunks()[0], vec![0u8; 320]);
        wait_until(|| phone.stats().malformed_packets == 1).await;
        assert_eq!(phone.stats().packets_received, 1);

        phone.stop().await;
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_pacer_sends_queued_audio() {
        let (phone, peer) = participant(DEFAULT_MAX_OUTBOUND_FRAMES).await;
        let bridge = Arc::new(MediaBridge::new());
        bridge.start().unwrap();
        phone.start(bridge.clone());

        phone.writer().unwrap().write(&vec![0u8; 320]).await.unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let frame = extract_frame(&buf[..len]).unwrap();
        assert_eq!(frame.payload_type, Codec::Pcmu.payload_type());
        assert_eq!(frame.payload, vec![0xFF; 160]);
        assert!(frame.marker);

        wait_until(|| phone.stats().packets_sent == 1).await;
        phone.stop().await;
        bridge.stop().await;
    }
}
