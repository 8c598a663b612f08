//! Value types shared by transports, roles and the connection manager

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ChatError;

// ----------------------------------------------------------------------------
// Service Identifier
// ----------------------------------------------------------------------------

/// Well-known 128-bit identifier peers use to locate the chat service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Bluetooth Serial Port Profile service class
    pub const SERIAL_PORT: ServiceId =
        ServiceId(Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB));

    /// Wrap an arbitrary UUID
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID
    pub const fn uuid(&self) -> Uuid {
        self.0
    }

    /// Big-endian byte representation, used as the TCP service preamble
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::SERIAL_PORT
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServiceId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ChatError::InvalidConfiguration {
                reason: format!("invalid service id '{}': {}", s, e),
            })
    }
}

// ----------------------------------------------------------------------------
// Peer Handle
// ----------------------------------------------------------------------------

/// Opaque address plus display name of a remote endpoint
///
/// The address format belongs to the transport: a Bluetooth device address
/// for RFCOMM, `host:port` for TCP, any unique string for the memory network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    pub address: String,
    pub name: String,
}

impl PeerHandle {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Handle for a peer whose name is unknown; the address doubles as name
    pub fn anonymous(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address,
        }
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.address {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

// ----------------------------------------------------------------------------
// Session Types
// ----------------------------------------------------------------------------

/// Identifier of a session, unique within one connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Which role produced the socket a session wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Accepted by the listener
    Inbound,
    /// Established by an initiator
    Outbound,
}

/// Coordinator-visible summary of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Listening,
    Connecting,
    Connected,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Listening => "listening",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// One received frame with its 1-based position in the session's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub order: u64,
}

impl InboundMessage {
    /// Payload decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
