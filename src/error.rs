//! Error types for the live voice session

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Capture or playback device cannot be acquired (missing, busy or denied).
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Duplex channel errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout")]
    Timeout,

    /// Network or protocol failure that kills the channel.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed inbound message. The message is dropped, the channel lives on.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Channel closed")]
    Closed,
}

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("A session is already active (state: {0})")]
    AlreadyActive(SessionState),

    #[error("Session start was cancelled")]
    Cancelled,

    #[error("API credential not configured")]
    MissingCredential,
}

impl Error {
    /// Short human-readable reason suitable for surfacing to the user.
    pub fn user_reason(&self) -> String {
        match self {
            Error::Audio(AudioError::DeviceUnavailable(_)) => {
                "Microphone access denied or device unavailable.".to_string()
            }
            Error::Network(_) => "Connection error.".to_string(),
            Error::Session(SessionError::MissingCredential) => "API Key not found.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
