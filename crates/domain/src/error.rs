//! Unified error types for the domain layer

use thiserror::Error;

use crate::value_objects::DiceParseError;

/// Unified error type for domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Validation failed (e.g., empty text for a command)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Dice notation could not be parsed
    #[error("Dice notation error: {0}")]
    Dice(#[from] DiceParseError),
}

impl DomainError {
    /// Creates a validation error for rejected input.
    ///
    /// # Example
    /// ```
    /// use tavern_domain::DomainError;
    ///
    /// let err = DomainError::validation("chat message cannot be empty");
    /// assert_eq!(err.to_string(), "Validation failed: chat message cannot be empty");
    /// ```
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Trim user-provided text and reject it when nothing is left.
pub fn require_text(input: &str, what: &str) -> Result<String, DomainError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{what} cannot be empty")));
    }
    Ok(trimmed.to_string())
}
