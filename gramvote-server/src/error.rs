//! Error taxonomy for engine operations.
//!
//! Every variant is recoverable: a failed operation reports its kind to
//! the caller and leaves persisted state untouched.

use std::fmt;

use crate::store::StoreError;

/// Error returned by lifecycle operations.
#[derive(Debug)]
pub enum EngineError {
    /// The addressed entity does not exist.
    NotFound(&'static str),
    /// The operation is illegal for the entity's current status.
    InvalidState(String),
    /// A concurrent writer got there first (lost race, duplicate
    /// nomination, conflicting candidacy).
    Conflict(String),
    /// Malformed input (empty rejection reason, inverted boundaries).
    Validation(String),
    /// The actor does not own the target resource.
    Unauthorized(String),
    /// No votes were cast; the result stays uncalculated.
    NoVotesCast,
    /// The storage layer failed.
    Store(StoreError),
}

impl EngineError {
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "{} not found", what),
            Self::InvalidState(reason) => write!(f, "invalid state: {}", reason),
            Self::Conflict(reason) => write!(f, "conflict: {}", reason),
            Self::Validation(reason) => write!(f, "validation failed: {}", reason),
            Self::Unauthorized(reason) => write!(f, "unauthorized: {}", reason),
            Self::NoVotesCast => write!(f, "no votes cast"),
            Self::Store(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_reason() {
        let e = EngineError::invalid_state("election is ACTIVE");
        assert_eq!(format!("{}", e), "invalid state: election is ACTIVE");

        let e = EngineError::NotFound("nomination");
        assert_eq!(format!("{}", e), "nomination not found");

        let e = EngineError::NoVotesCast;
        assert_eq!(format!("{}", e), "no votes cast");
    }
}
