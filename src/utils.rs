//! Utility functions for the pairing service

use crate::types::SessionId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique session ID
pub fn generate_session_id() -> SessionId {
    Uuid::new_v4()
}

/// Generate a new lock owner token
pub fn generate_lock_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}
