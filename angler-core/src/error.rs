use thiserror::Error;

use crate::command::ParseError;

/// Failures a behavior can run into.
///
/// Everything except [`BehaviorError::Disconnected`] is local to the behavior
/// that raised it: the coordinator reports it through chat and the agent
/// falls back to Idle.
#[derive(Debug, Error)]
pub enum BehaviorError {
    /// Malformed command text. Logged and ignored.
    #[error("invalid command: {0}")]
    UserInput(#[from] ParseError),

    /// A world query came back empty (no water, no bed, no chest...).
    #[error("{0}")]
    WorldQueryEmpty(String),

    /// The world rejected an action (equip, sleep, deposit...).
    #[error("{action} failed: {reason}")]
    ActionFailure { action: &'static str, reason: String },

    /// The connection to the world is gone.
    #[error("disconnected: {0}")]
    Disconnected(String),
}

impl BehaviorError {
    pub fn empty(notice: impl Into<String>) -> Self {
        Self::WorldQueryEmpty(notice.into())
    }

    pub fn action(action: &'static str, err: impl std::fmt::Display) -> Self {
        Self::ActionFailure {
            action,
            reason: err.to_string(),
        }
    }

    /// Text shown to players in chat for this failure.
    pub fn notice(&self) -> String {
        match self {
            Self::UserInput(_) => "I don't understand!".to_string(),
            Self::WorldQueryEmpty(notice) => notice.clone(),
            Self::ActionFailure { reason, .. } => reason.clone(),
            Self::Disconnected(reason) => format!("Disconnected: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_command_is_user_input() {
        let err = BehaviorError::from(ParseError::UnterminatedQuote(4));
        assert!(matches!(err, BehaviorError::UserInput(ParseError::UnterminatedQuote(4))));
        assert_eq!(err.notice(), "I don't understand!");
    }

    #[test]
    fn test_notices() {
        assert_eq!(BehaviorError::empty("No chests nearby!").notice(), "No chests nearby!");
        assert_eq!(
            BehaviorError::action("equip", "I don't have a fishing rod!").notice(),
            "I don't have a fishing rod!"
        );
        assert_eq!(
            BehaviorError::Disconnected("banned".to_string()).notice(),
            "Disconnected: banned"
        );
    }
}
