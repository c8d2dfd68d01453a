//! Session lifecycle states

use serde::Serialize;
use std::fmt;

/// Lifecycle of the single voice session
///
/// ```text
/// Idle ─▶ Connecting ─▶ Streaming ─▶ Closing ─▶ Idle
///              │             │
///              └──▶ Error ◀──┘ ─▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Closing,
    Error,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Closing)
                | (Connecting, Error)
                | (Streaming, Closing)
                | (Streaming, Error)
                | (Closing, Idle)
                | (Error, Idle)
        )
    }

    /// Resources may be held in this state
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        use SessionState::*;
        let path = [Idle, Connecting, Streaming, Closing, Idle];
        assert!(path.windows(2).all(|w| w[0].can_transition_to(w[1])));
    }

    #[test]
    fn test_error_paths() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Error));
        assert!(Streaming.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Error));
        assert!(!Error.can_transition_to(Streaming));
        assert!(!Idle.can_transition_to(Streaming));
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&SessionState::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(SessionState::Closing.to_string(), "closing");
    }
}
