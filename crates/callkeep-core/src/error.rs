//! Error types for the call connection layer

use thiserror::Error;

use crate::connection::ConnectionState;

/// Result type for callkeep operations
pub type Result<T> = std::result::Result<T, CallKeepError>;

/// Errors that can occur while routing call events
#[derive(Debug, Error)]
pub enum CallKeepError {
    /// A connection is already registered under this call id
    #[error("Call already registered: {call_id}")]
    DuplicateCall { call_id: String },

    /// No connection is registered under this call id
    #[error("Call not found: {call_id}")]
    CallNotFound { call_id: String },

    /// The connection already reached its terminal state
    #[error("Call {call_id} is disconnected; event '{event}' rejected")]
    CallTerminated { call_id: String, event: String },

    /// The event is not valid in the connection's current state
    #[error("Invalid transition for call {call_id}: '{event}' in state {state}")]
    InvalidTransition {
        call_id: String,
        state: ConnectionState,
        event: String,
    },

    /// Removal was requested for a connection that is still live
    #[error("Call {call_id} is still {state}; only disconnected calls can be released")]
    NotTerminated {
        call_id: String,
        state: ConnectionState,
    },

    /// An external payload could not be decoded
    #[error("Malformed payload: {reason}")]
    MalformedPayload { reason: String },

    /// The notification relay failed to render or cancel an alert
    #[error("Notification relay error: {message}")]
    Relay { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl CallKeepError {
    /// Create a malformed payload error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    /// Create a relay error
    pub fn relay(message: impl Into<String>) -> Self {
        Self::Relay {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error reports an event rejected by the state machine
    pub fn is_rejected_transition(&self) -> bool {
        matches!(
            self,
            Self::CallTerminated { .. } | Self::InvalidTransition { .. }
        )
    }
}
