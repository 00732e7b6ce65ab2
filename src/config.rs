//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (`config.toml`, optional)
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Conventional variables: `HOST`, `PORT`, `GOOGLE_API_KEY`, `LOG_LEVEL`, `LOG_FORMAT`
//! 2. Prefixed variables: `APP_SERVER__PORT`, `APP_GEMINI__MODEL`, `APP_MEDIA__CODEC`, ...
//! 3. Configuration file (`config.toml`)
//! 4. Default values (defined in the Default impls)
//!
//! Nested keys are separated by a double underscore so that field names which
//! contain underscores (`api_key`, `remote_rtp_addr`) stay addressable.

use crate::audio::codec::Codec;
use crate::session::config::SessionConfig;
use crate::session::gemini::{DEFAULT_SETUP_TIMEOUT, GEMINI_LIVE_ENDPOINT};
use crate::session::handler::DEFAULT_MODEL;
use crate::telephony::DEFAULT_MAX_OUTBOUND_FRAMES;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;

/// Main application configuration.
///
/// ## Sections:
/// - **server**: admin HTTP listener
/// - **gemini**: live backend credentials and model
/// - **session**: default AI behaviour for new calls
/// - **media**: RTP leg of the static call
/// - **logging**: log level and output format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub session: SessionConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
}

/// Admin HTTP server settings.
///
/// - `host = "127.0.0.1"`: only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Gemini Live backend settings. An empty `api_key` means "not configured".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    /// Seconds to wait for `setupComplete` after connecting.
    pub setup_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: GEMINI_LIVE_ENDPOINT.to_string(),
            setup_timeout_secs: DEFAULT_SETUP_TIMEOUT.as_secs(),
        }
    }
}

/// RTP media settings.
///
/// When `remote_rtp_addr` is set the process binds `local_rtp_addr` at startup
/// and bridges that stream to a new AI session. Empty means no static call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub codec: String,
    pub local_rtp_addr: String,
    pub remote_rtp_addr: String,
    /// Upper bound on audio queued for playback to the caller, in 20 ms frames.
    pub max_outbound_frames: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            codec: "PCMU".to_string(),
            local_rtp_addr: "0.0.0.0:10000".to_string(),
            remote_rtp_addr: String::new(),
            max_outbound_frames: DEFAULT_MAX_OUTBOUND_FRAMES,
        }
    }
}

impl MediaConfig {
    pub fn codec(&self) -> Result<Codec> {
        self.codec.parse::<Codec>().map_err(|e| anyhow::anyhow!(e))
    }

    /// Remote RTP address of the static call, if one is configured.
    pub fn remote_addr(&self) -> Result<Option<SocketAddr>> {
        if self.remote_rtp_addr.trim().is_empty() {
            return Ok(None);
        }
        let addr = self
            .remote_rtp_addr
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid remote RTP address '{}': {}", self.remote_rtp_addr, e))?;
        Ok(Some(addr))
    }
}

/// Log output settings. `format` is `"text"` or `"json"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "live_call_bridge=debug,actix_web=info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## What this does:
    /// 1. Start with the built-in defaults
    /// 2. Override with values from `config.toml` (if it exists)
    /// 3. Override with `APP_` variables, `__` separating nested keys
    /// 4. Apply the conventional `HOST`, `PORT`, `GOOGLE_API_KEY`, `LOG_*` variables last
    ///
    /// ## Rust Concepts:
    /// - **Builder pattern**: each `add_source` layers over the previous ones
    /// - **Shadowing `settings`**: `set_override` consumes the builder and returns a new one
    /// - **try_deserialize**: serde maps the merged tree back onto `AppConfig`
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9090`: Override the admin port
    /// - `APP_GEMINI__MODEL=models/gemini-2.0-flash-exp`: Override the live model
    /// - `APP_MEDIA__REMOTE_RTP_ADDR=10.0.0.5:4000`: Start the static call
    /// - `GOOGLE_API_KEY=...`: Same key the Google SDKs read
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Conventional variables used by deployment platforms and the Google SDKs.
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),         // Set by most PaaS runtimes
            ("GOOGLE_API_KEY", "gemini.api_key"),
            ("LOG_LEVEL", "logging.level"),
            ("LOG_FORMAT", "logging.format"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.gemini.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Gemini model cannot be empty"));
        }

        self.media.codec()?;

        if self.media.remote_addr()?.is_some() {
            self.media
                .local_rtp_addr
                .parse::<SocketAddr>()
                .map_err(|e| anyhow::anyhow!("Invalid local RTP address '{}': {}", self.media.local_rtp_addr, e))?;
        }

        if self.media.max_outbound_frames == 0 {
            return Err(anyhow::anyhow!("Max outbound frames must be greater than 0"));
        }

        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(anyhow::anyhow!(
                "Log format must be 'text' or 'json', got '{}'",
                self.logging.format
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.gemini.model, DEFAULT_MODEL);
        assert!(config.gemini.api_key.is_empty());
        assert_eq!(config.media.codec().unwrap(), Codec::Pcmu);
        assert_eq!(config.media.remote_addr().unwrap(), None);
        assert_eq!(config.session.voice.as_deref(), Some("Puck"));
        assert!(!config.logging.is_json());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.media.codec = "G722".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.media.remote_rtp_addr = "not-an-address".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.media.max_outbound_frames = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gemini.model = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_static_call_addresses() {
        let mut config = AppConfig::default();
        config.media.remote_rtp_addr = "192.0.2.10:40000".to_string();
        config.media.codec = "pcma".to_string();

        assert!(config.validate().is_ok());
        assert_eq!(
            config.media.remote_addr().unwrap(),
            Some("192.0.2.10:40000".parse().unwrap())
        );
        assert_eq!(config.media.codec().unwrap(), Codec::Pcma);
    }

    #[test]
    fn test_config_round_trips_through_config_crate() {
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .set_override("gemini.api_key", "secret")
            .unwrap()
            .set_override("server.port", 9090)
            .unwrap()
            .build()
            .unwrap();
        let config: AppConfig = built.try_deserialize().unwrap();

        assert_eq!(config.gemini.api_key, "secret");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.session.language.as_deref(), Some("en-US"));
    }
}
