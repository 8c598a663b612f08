//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Transport to use, overriding the configuration file
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportKind>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wait for a peer to connect, then chat
    Listen,
    /// Connect to a peer, then chat
    Connect {
        /// Peer address, or 1-based index into the `peers` list
        target: String,
    },
    /// List paired peers
    Peers,
    /// Show configuration and transport status
    Status,
}

/// Link layer carrying the chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP stand-in for machines without a radio
    #[default]
    Tcp,
    /// Bluetooth RFCOMM through BlueZ
    Rfcomm,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::Rfcomm => f.write_str("rfcomm"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_with_global_flags() {
        let cli = Cli::parse_from(["bluechat", "-v", "--transport", "rfcomm", "connect", "2"]);
        assert!(cli.verbose);
        assert_eq!(cli.transport, Some(TransportKind::Rfcomm));
        assert!(matches!(cli.command, Commands::Connect { ref target } if target == "2"));
    }

    #[test]
    fn transport_defaults_to_config() {
        let cli = Cli::parse_from(["bluechat", "listen"]);
        assert_eq!(cli.transport, None);
        assert!(matches!(cli.command, Commands::Listen));
    }
}
