//! # Call
//!
//! Wires one telephony leg and one AI session through a media bridge.
//!
//! ## Startup Order:
//! 1. Start the bridge
//! 2. Register the telephony participant
//! 3. Create and start the AI session (registers itself)
//! 4. Start the telephony pacer and receiver
//!
//! The telephony tasks start last so no caller audio reaches the AI writer
//! before its connection exists.

use crate::bridge::{BridgeStats, MediaBridge};
use crate::error::SessionError;
use crate::session::{LiveConnector, SessionConfig, SessionHandler, SessionState, SessionStats};
use crate::telephony::{RtpEndpoint, RtpParticipant, TelephonyStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Serializable view of a call for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub codec: String,
    pub remote: String,
    pub model: String,
    pub participants: Vec<String>,
    pub session_state: SessionState,
    pub bridge: BridgeStats,
    pub session: SessionStats,
    pub telephony: TelephonyStats,
}

pub struct Call {
    id: String,
    started_at: DateTime<Utc>,
    bridge: Arc<MediaBridge>,
    telephony: Arc<RtpParticipant>,
    session: SessionHandler,
    hung_up: AtomicBool,
}

impl Call {
    /// Bring up a call. On failure everything already started is torn down.
    pub async fn start(
        id: impl Into<String>,
        endpoint: RtpEndpoint,
        session_config: Option<SessionConfig>,
        connector: Arc<dyn LiveConnector>,
        model: &str,
        max_outbound_frames: usize,
    ) -> Result<Self, SessionError> {
        let id = id.into();
        info!("Starting call {} with {} at {}", id, endpoint.codec, endpoint.remote);

        let bridge = Arc::new(MediaBridge::new());
        if let Err(err) = bridge.start() {
            error!("Call {} could not start media bridge: {}", id, err);
            return Err(SessionError::Closed);
        }

        let telephony = Arc::new(RtpParticipant::new(
            format!("{}-phone", id),
            endpoint,
            max_outbound_frames,
        ));
        bridge.add_participant(telephony.clone());

        let session = SessionHandler::new(bridge.clone(), format!("{}-ai", id), session_config, connector)
            .with_model(model);

        if let Err(err) = session.start().await {
            error!("Call {} failed to start AI session: {}", id, err);
            session.close().await;
            telephony.stop().await;
            bridge.stop().await;
            return Err(err);
        }

        telephony.start(bridge.clone());
        info!("Call {} is live", id);

        Ok(Self {
            id,
            started_at: Utc::now(),
            bridge,
            telephony,
            session,
            hung_up: AtomicBool::new(false),
        })
    }

    /// Close the AI session, stop the telephony leg, stop the bridge. Idempotent.
    pub async fn hangup(&self) {
        if self.hung_up.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Hanging up call {}", self.id);
        self.session.close().await;
        self.telephony.stop().await;
        self.bridge.stop().await;
        info!("Call {} ended", self.id);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        !self.hung_up.load(Ordering::Acquire) && !self.session.is_closed()
    }

    pub fn summary(&self) -> CallSummary {
        CallSummary {
            id: self.id.clone(),
            started_at: self.started_at,
            codec: self.telephony.codec().to_string(),
            remote: self.telephony.remote().to_string(),
            model: self.session.model().to_string(),
            participants: self.bridge.participant_ids(),
            session_state: self.session.state(),
            bridge: self.bridge.stats(),
            session: self.session.stats(),
            telephony: self.telephony.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::Codec;
    use crate::test_support::{ScriptedConnection, ScriptedConnector};
    use tokio::net::UdpSocket;

    async fn endpoint() -> (RtpEndpoint, UdpSocket) {
        let local = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = RtpEndpoint {
            socket: Arc::new(local),
            remote: peer.local_addr().unwrap(),
            codec: Codec::Pcma,
        };
        (endpoint, peer)
    }

    #[tokio::test]
    async fn test_call_lifecycle() {
        let (endpoint, _peer) = endpoint().await;
        let connection = ScriptedConnection::new(vec![]);
        let call = Call::start(
            "call-1",
            endpoint,
            None,
            ScriptedConnector::new(connection.clone()),
            "test-model",
            50,
        )
        .await
        .unwrap();

        let summary = call.summary();
        assert_eq!(summary.id, "call-1");
        assert_eq!(summary.codec, "PCMA");
        assert_eq!(summary.model, "test-model");
        assert_eq!(
            summary.participants,
            vec!["call-1-ai".to_string(), "call-1-phone".to_string()]
        );
        assert_eq!(summary.session_state, SessionState::Active);
        assert!(call.is_active());

        call.hangup().await;
        call.hangup().await;
        assert!(!call.is_active());
        assert_eq!(connection.close_calls(), 1);
        assert!(call.summary().participants.is_empty());
        assert_eq!(call.summary().session_state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_session_unwinds_call() {
        let (endpoint, _peer) = endpoint().await;
        let result = Call::start(
            "call-2",
            endpoint,
            None,
            ScriptedConnector::failing(),
            "test-model",
            50,
        )
        .await;
        assert!(matches!(result, Err(SessionError::Backend(_))));
    }
}
