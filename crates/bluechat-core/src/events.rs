//! Events delivered from the connection core to the UI layer
//!
//! Roles never talk to the UI directly. They report through an
//! [`EventReporter`] into the connection manager, which updates its state and
//! forwards every event, in order, on the channel returned by
//! [`ConnectionManager::take_event_receiver`](crate::ConnectionManager::take_event_receiver).

use tokio::sync::mpsc;
use tracing::trace;

use crate::errors::ChatError;
use crate::types::{InboundMessage, PeerHandle, SessionId, SessionOrigin};

// ----------------------------------------------------------------------------
// Event Types
// ----------------------------------------------------------------------------

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The remote side closed the link
    PeerClosed,
    /// Closed locally: superseded by a new session or shut down
    Cancelled,
    /// Driver failure or framing violation
    Failed(ChatError),
}

/// Notification for the UI collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A new session became the current one
    Connected {
        session: SessionId,
        peer: PeerHandle,
        origin: SessionOrigin,
    },
    /// A session's read loop terminated; emitted exactly once per session
    SessionEnded {
        session: SessionId,
        peer: PeerHandle,
        reason: EndReason,
    },
    /// One complete frame arrived
    MessageReceived {
        session: SessionId,
        peer: PeerHandle,
        message: InboundMessage,
    },
    /// An outbound attempt ended without a session
    ConnectFailed { peer: PeerHandle, error: ChatError },
    /// The listener could not start or stopped on a driver failure
    ListenFailed { error: ChatError },
}

impl ChatEvent {
    /// Session the event belongs to, if any
    pub fn session(&self) -> Option<SessionId> {
        match self {
            ChatEvent::Connected { session, .. }
            | ChatEvent::SessionEnded { session, .. }
            | ChatEvent::MessageReceived { session, .. } => Some(*session),
            ChatEvent::ConnectFailed { .. } | ChatEvent::ListenFailed { .. } => None,
        }
    }
}

/// Receiving side of the UI event stream
pub type EventReceiver = mpsc::UnboundedReceiver<ChatEvent>;

// ----------------------------------------------------------------------------
// Reporter
// ----------------------------------------------------------------------------

/// Cloneable handle roles use to report events
#[derive(Debug, Clone)]
pub struct EventReporter {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl EventReporter {
    /// Create a reporter and the receiver its events arrive on
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an event; dropped silently once the receiver is gone
    pub fn emit(&self, event: ChatEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!("Event dropped, receiver closed: {:?}", e.0);
        }
    }
}
