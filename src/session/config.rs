use serde::{Deserialize, Serialize};

/// Instructions used when none are configured.
pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str =
    "You are a helpful voice assistant. Respond naturally to the user's audio input.";

pub const DEFAULT_VOICE: &str = "Puck";

pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Per-session behaviour of the AI participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub system_instructions: String,
    pub voice: Option<String>,
    pub language: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
            voice: Some(DEFAULT_VOICE.to_string()),
            language: Some(DEFAULT_LANGUAGE.to_string()),
        }
    }
}

impl SessionConfig {
    /// Fill in defaults: a missing config becomes the default one, and blank
    /// instructions are replaced by the default instructions.
    pub fn resolve(config: Option<SessionConfig>) -> SessionConfig {
        let mut config = config.unwrap_or_default();
        if config.system_instructions.trim().is_empty() {
            config.system_instructions = DEFAULT_SYSTEM_INSTRUCTIONS.to_string();
        }
        config
    }
}
