//! Error types for the pairing service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific pairing scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Shared store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Shared store operation '{operation}' timed out")]
    StoreTimeout { operation: String },

    #[error("Invalid search request: {reason}")]
    InvalidSearchRequest { reason: String },

    #[error("Malformed payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("Participant is not searching: {participant_id}")]
    ParticipantNotSearching { participant_id: String },

    #[error("Session commit failed: {reason}")]
    SessionCommitFailed { reason: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchError {
    /// Whether the error is a transient store fault worth retrying later
    pub fn is_store_fault(&self) -> bool {
        matches!(
            self,
            MatchError::StoreUnavailable { .. } | MatchError::StoreTimeout { .. }
        )
    }
}

/// Whether an `anyhow` error wraps a transient store fault
pub fn is_store_fault(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<MatchError>()
        .map(MatchError::is_store_fault)
        .unwrap_or(false)
}
