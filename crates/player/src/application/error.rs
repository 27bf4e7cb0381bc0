//! Command rejection errors

use tavern_domain::{DiceParseError, DomainError};
use thiserror::Error;

use crate::ports::outbound::SendError;

/// Why a session command was rejected. Rejected commands are never queued
/// or retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid dice notation: {0}")]
    InvalidNotation(#[from] DiceParseError),

    #[error(transparent)]
    Send(#[from] SendError),
}

impl From<DomainError> for CommandError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => Self::Validation(msg),
            DomainError::Dice(e) => Self::InvalidNotation(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavern_domain::ConnectionStatus;

    #[test]
    fn domain_errors_map_onto_command_errors() {
        let err: CommandError = DomainError::validation("chat message cannot be empty").into();
        assert_eq!(err.to_string(), "chat message cannot be empty");

        let err: CommandError = DomainError::Dice(DiceParseError::Empty).into();
        assert!(matches!(err, CommandError::InvalidNotation(DiceParseError::Empty)));
    }

    #[test]
    fn send_errors_display_transparently() {
        let err: CommandError = SendError::SendWhileDisconnected {
            state: ConnectionStatus::Reconnecting,
        }
        .into();
        assert_eq!(err.to_string(), "cannot send while reconnecting");
    }
}
