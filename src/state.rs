//! # Application State
//!
//! Shared state handed to every HTTP handler: the loaded configuration, the
//! registry of live calls and the process start time.
//!
//! ## Locking:
//! The call registry sits behind a single `RwLock`. Handlers clone the `Arc<Call>`
//! they need and release the lock before doing anything async with it.

use crate::call::{Call, CallSummary};
use crate::config::AppConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state, cloned into every actix worker.
///
/// ## Rust Concepts:
/// - **Arc**: every clone points at the same config and call registry
/// - **RwLock**: many handlers can list calls while a hangup removes one
/// - **Clone derive**: cheap, only reference counts are bumped
#[derive(Clone)]
pub struct AppState {
    /// Configuration is fixed after startup.
    pub config: Arc<AppConfig>,
    pub calls: Arc<RwLock<HashMap<String, Arc<Call>>>>, // Keyed by call id
    pub start_time: Instant,                            // For uptime in /health
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            calls: Arc::new(RwLock::new(HashMap::new())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn register_call(&self, call: Arc<Call>) {
        self.calls.write().insert(call.id().to_string(), call);
    }

    pub fn remove_call(&self, id: &str) -> Option<Arc<Call>> {
        self.calls.write().remove(id)
    }

    pub fn get_call(&self, id: &str) -> Option<Arc<Call>> {
        self.calls.read().get(id).cloned()
    }

    /// Every registered call, for shutdown.
    pub fn all_calls(&self) -> Vec<Arc<Call>> {
        self.calls.read().values().cloned().collect()
    }

    /// Summaries ordered by start time, oldest first.
    pub fn call_summaries(&self) -> Vec<CallSummary> {
        let mut summaries: Vec<CallSummary> = self.all_calls().iter().map(|c| c.summary()).collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    pub fn active_call_count(&self) -> usize {
        self.calls.read().values().filter(|c| c.is_active()).count()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::codec::Codec;
    use crate::telephony::RtpEndpoint;
    use crate::test_support::{ScriptedConnection, ScriptedConnector};
    use tokio::net::UdpSocket;

    pub(crate) async fn start_test_call(id: &str) -> Arc<Call> {
        let local = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = RtpEndpoint {
            socket: Arc::new(local),
            remote: "127.0.0.1:9".parse().unwrap(),
            codec: Codec::Pcmu,
        };
        let connector = ScriptedConnector::new(ScriptedConnection::new(vec![]));
        Arc::new(
            Call::start(id, endpoint, None, connector, "test-model", 50)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_call_registry() {
        let state = AppState::new(AppConfig::default());
        assert!(state.call_summaries().is_empty());

        let first = start_test_call("a").await;
        let second = start_test_call("b").await;
        state.register_call(first.clone());
        state.register_call(second.clone());

        assert_eq!(state.active_call_count(), 2);
        assert!(state.get_call("a").is_some());
        assert!(state.get_call("missing").is_none());

        let ids: Vec<String> = state.call_summaries().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        second.hangup().await;
        assert_eq!(state.active_call_count(), 1);

        let removed = state.remove_call("a").unwrap();
        removed.hangup().await;
        assert!(state.remove_call("a").is_none());
        assert_eq!(state.all_calls().len(), 1);
    }
}
