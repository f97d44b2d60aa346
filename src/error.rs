//! Error types for the realtime client.

use thiserror::Error;

/// Errors that can occur when using the realtime client.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The socket is not open; the outbound message was dropped.
    #[error("not connected to server")]
    NotConnected,

    /// A local action is not allowed in the current state of a protocol machine.
    #[error("{machine}: cannot {action} while {phase}")]
    InvalidTransition {
        /// Which state machine refused the action (`"lobby"`, `"tournament"`, ...).
        machine: &'static str,
        /// The attempted action.
        action: &'static str,
        /// Debug rendering of the phase the machine was in.
        phase: String,
    },

    /// A lobby action was requested but no lobby session is active.
    #[error("no active lobby")]
    NoActiveLobby,

    /// A match input was requested but no match is bound.
    #[error("no active match")]
    NoActiveMatch,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RealtimeError {
    pub(crate) fn invalid_transition(
        machine: &'static str,
        action: &'static str,
        phase: &impl std::fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            machine,
            action,
            phase: format!("{phase:?}"),
        }
    }
}

/// A specialized [`Result`] type for realtime client operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
