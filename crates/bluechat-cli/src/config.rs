//! BlueChat CLI configuration
//!
//! Everything is optional in the TOML file; missing sections take their
//! defaults. Example:
//!
//! ```toml
//! transport = "tcp"
//! connect_timeout_secs = 15
//!
//! [chat]
//! max_frame_len = 4096
//!
//! [tcp]
//! bind_addr = "0.0.0.0:7070"
//!
//! [rfcomm]
//! adapter = "hci0"
//! channel = 3
//!
//! [[peers]]
//! address = "192.168.1.20:7070"
//! name = "Laptop"
//! ```

use std::path::Path;

use bluechat_core::{ChatConfig, PeerHandle};
use bluechat_rfcomm::RfcommConfig;
use serde::{Deserialize, Serialize};

use crate::cli::TransportKind;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Configuration Types
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Transport used when `--transport` is not given
    pub transport: TransportKind,
    /// Upper bound on an outbound connection attempt
    pub connect_timeout_secs: u64,
    /// Connection core settings
    pub chat: ChatConfig,
    pub tcp: TcpConfig,
    pub rfcomm: RfcommConfig,
    /// Known peers for the TCP transport, in display order
    pub peers: Vec<PeerHandle>,
}

/// TCP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Address the listener binds to
    pub bind_addr: String,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7070".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            connect_timeout_secs: 20,
            chat: ChatConfig::default(),
            tcp: TcpConfig::default(),
            rfcomm: RfcommConfig::default(),
            peers: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and Saving
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        self.chat.validate()?;
        self.rfcomm.validate()?;

        if self.connect_timeout_secs == 0 {
            return Err(CliError::Config(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.tcp.bind_addr.trim().is_empty() {
            return Err(CliError::Config("tcp.bind_addr is empty".to_string()));
        }
        if let Some(peer) = self.peers.iter().find(|p| p.address.trim().is_empty()) {
            return Err(CliError::Config(format!(
                "peer '{}' has an empty address",
                peer.name
            )));
        }
        Ok(())
    }

    /// Connection timeout as a duration
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }
}
