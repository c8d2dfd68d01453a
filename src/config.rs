//! Application configuration
//!
//! Loaded from `config.toml` in the platform configuration directory,
//! falling back to defaults when the file does not exist.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result, SessionError};

const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
const DEFAULT_VOICE: &str = "Fenrir";
const DEFAULT_INSTRUCTION: &str = "You are an expert Cigar Sommelier named \"Havana\". \
Your tone is sophisticated, relaxing, and knowledgeable, like an old friend at a high-end lounge. \
Help the user identify flavors, suggest pairings (whiskey, coffee, rum), and explain cigar terminology. \
Keep responses concise but warm.";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub live: LiveConfig,
    pub ui: UiConfig,
}

/// Capture and playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device id (`input:<name>`), system default when unset
    pub input_device: Option<String>,
    /// Output device id (`output:<name>`), system default when unset
    pub output_device: Option<String>,
    /// Samples per outbound frame at the wire rate
    pub frame_size: usize,
    /// Gain applied to the RMS amplitude for metering
    pub level_gain: f32,
    /// Outbound frame queue capacity
    pub queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frame_size: DEFAULT_FRAME_SIZE,
            level_gain: DEFAULT_LEVEL_GAIN,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Remote conversational service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Environment variable holding the API credential
    pub api_key_env: String,
    pub connect_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_INSTRUCTION.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl LiveConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Read the API credential from the configured environment variable.
    pub fn api_key(&self) -> std::result::Result<String, SessionError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(SessionError::MissingCredential),
        }
    }
}

/// HTTP control surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "live-voice-session")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, or defaults if there is no file.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()
            .ok_or_else(|| Error::Config("no configuration directory available".into()))?;
        self.save_to(&path)
    }

    /// Write to the given path, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.audio.frame_size == 0 {
            return Err(Error::Config("audio.frame_size must be positive".into()));
        }
        if self.audio.queue_capacity == 0 {
            return Err(Error::Config("audio.queue_capacity must be positive".into()));
        }
        if !self.audio.level_gain.is_finite() || self.audio.level_gain < 0.0 {
            return Err(Error::Config("audio.level_gain must be a non-negative number".into()));
        }
        Ok(())
    }
}
