//! Connection lifecycle core for BlueChat
//!
//! Point-to-point chat over short-range stream sockets. One device listens
//! under a well-known service identifier; any device may instead connect to
//! a paired peer. At most one data session is active at a time.
//!
//! ## Architecture
//!
//! - [`transport`] - socket abstraction plus memory and TCP implementations
//! - [`session`] - one live socket and its frame-decoding read loop
//! - [`listener`] - long-lived acceptor of inbound connections
//! - [`initiator`] - one-shot outbound connection attempt
//! - [`manager`] - owner of the roles and the single current session
//! - [`events`] - notifications delivered to the UI layer
//! - [`framing`] - length-prefixed wire framing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluechat_core::{ChatConfig, ConnectionManager, PeerHandle, TcpTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(TcpTransport::new("0.0.0.0:7070"));
//! let manager = ConnectionManager::new(transport, ChatConfig::default())?;
//! let mut events = manager.take_event_receiver().expect("first take");
//!
//! manager.connect_to(PeerHandle::anonymous("192.168.1.20:7070")).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod events;
pub mod framing;
pub mod initiator;
pub mod listener;
pub mod manager;
pub mod session;
pub mod transport;
pub mod types;

pub use config::ChatConfig;
pub use errors::{ChatError, ChatResult};
pub use events::{ChatEvent, EndReason, EventReceiver, EventReporter};
pub use framing::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
pub use initiator::{Initiator, InitiatorOutcome};
pub use listener::Listener;
pub use manager::ConnectionManager;
pub use session::{Session, SessionInstaller};
pub use transport::{
    CloseSignal, ListenHandle, MemoryNetwork, MemoryTransport, PeerDirectory, Socket,
    StaticDirectory, StreamSocket, TcpTransport, Transport,
};
pub use types::{
    ConnectionState, InboundMessage, PeerHandle, ServiceId, SessionId, SessionOrigin,
};
