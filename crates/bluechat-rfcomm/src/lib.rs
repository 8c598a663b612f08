//! Bluetooth RFCOMM transport for BlueChat
//!
//! This crate implements the `Transport` and `PeerDirectory` traits from
//! `bluechat-core` on top of BlueZ, so two paired devices can chat over a
//! classic Bluetooth serial link.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluechat_core::{ChatConfig, ConnectionManager};
//! use bluechat_rfcomm::{RfcommConfig, RfcommTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RfcommConfig::new().with_adapter("hci0").with_channel(3);
//! let transport = Arc::new(RfcommTransport::new(config)?);
//!
//! let manager = ConnectionManager::new(transport, ChatConfig::default())?;
//! manager.start_listening().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: BlueZ via the `bluer` crate (requires a running `bluetoothd`)
//! - **Other platforms**: every operation fails with `TransportUnavailable`

mod config;
mod error;
mod platform;
mod transport;

pub use config::{RfcommConfig, MAX_RFCOMM_CHANNEL};
pub use error::RfcommError;
pub use platform::AdapterStatus;
pub use transport::RfcommTransport;
