//! Error types for the RFCOMM transport

use bluechat_core::ChatError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the RFCOMM transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RfcommError {
    #[error("BlueZ session unavailable: {0}")]
    Session(String),

    #[error("Bluetooth adapter not available: {0}")]
    AdapterNotAvailable(String),

    #[error("Bluetooth adapter {0} is powered off")]
    PoweredOff(String),

    #[error("Failed to register RFCOMM profile: {0}")]
    ProfileRegistration(String),

    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    #[error("Connection to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Failed to accept connection from {address}: {reason}")]
    AcceptFailed { address: String, reason: String },

    #[error("Profile connection requests stopped")]
    RequestStreamEnded,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("RFCOMM requires BlueZ and is not supported on this platform")]
    Unsupported,
}

impl From<RfcommError> for ChatError {
    fn from(err: RfcommError) -> Self {
        match err {
            RfcommError::ConnectFailed { address, reason } => {
                ChatError::ConnectFailed {
                    peer: address,
                    reason,
                }
            }
            RfcommError::InvalidAddress(address) => ChatError::ConnectFailed {
                reason: format!("invalid Bluetooth address '{}'", address),
                peer: address,
            },
            RfcommError::InvalidConfiguration(reason) => ChatError::InvalidConfiguration { reason },
            RfcommError::AcceptFailed { .. } | RfcommError::RequestStreamEnded => {
                ChatError::Transport(err.to_string())
            }
            RfcommError::Session(_)
            | RfcommError::AdapterNotAvailable(_)
            | RfcommError::PoweredOff(_)
            | RfcommError::ProfileRegistration(_)
            | RfcommError::Unsupported => ChatError::unavailable(err.to_string()),
        }
    }
}
