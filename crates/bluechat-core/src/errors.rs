//! Error types for the BlueChat connection core
//!
//! Every role (listener, initiator, session) reports failures with
//! [`ChatError`]. The type is `Clone` so the same failure can be returned to
//! a caller and carried inside a [`ChatEvent`](crate::events::ChatEvent).

use std::io;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors produced by transports, roles and the connection manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Radio absent, powered off, or the service could not be bound
    #[error("Transport is not available: {reason}")]
    TransportUnavailable { reason: String },

    /// Terminal failure of an outbound connection attempt
    #[error("Connection to {peer} failed: {reason}")]
    ConnectFailed { peer: String, reason: String },

    /// Peer closed the link, or it was closed locally
    #[error("Peer disconnected")]
    Disconnected,

    /// Driver-level I/O failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Send attempted without an active session
    #[error("No active session")]
    NotConnected,

    /// Operation interrupted by an explicit cancel or shutdown
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Already listening")]
    AlreadyListening,

    /// The connection manager has been shut down
    #[error("Connection manager is closed")]
    Closed,
}

impl ChatError {
    /// Create a transport-unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a connect failure for the given peer address
    pub fn connect_failed(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error ends a link as a normal disconnect
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Cancelled)
    }
}

impl From<io::Error> for ChatError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ChatError::Disconnected,
            _ => ChatError::Transport(err.to_string()),
        }
    }
}

/// Result type for BlueChat operations
pub type ChatResult<T> = core::result::Result<T, ChatError>;
