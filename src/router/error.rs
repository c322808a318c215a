//! Errors raised while turning an inbound frame into a command

use thiserror::Error;

/// Recoverable command failures; none of them ends a session
#[derive(Debug, Error)]
pub enum CommandError {
    /// The frame is not a structurally valid command record
    #[error("Malformed command: {0}")]
    Decode(#[from] serde_json::Error),

    /// A numeric field that JSON could carry but that is not a usable number
    #[error("Non-finite value in {action}: {value}")]
    NonFinite { action: String, value: f64 },

    /// The action is not one the bridge knows
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A button action with a missing or unrecognised state
    #[error("Unknown state {state:?} for {action}")]
    UnknownState {
        action: String,
        state: Option<String>,
    },
}

impl CommandError {
    /// Decode failures are malformed payloads; the rest are well-formed but unknown
    pub fn is_decode(&self) -> bool {
        matches!(self, CommandError::Decode(_) | CommandError::NonFinite { .. })
    }
}
