//! Error handling for the BlueChat CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("BlueChat error: {0}")]
    Chat(#[from] bluechat_core::ChatError),

    #[error("RFCOMM error: {0}")]
    Rfcomm(#[from] bluechat_rfcomm::RfcommError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Peer selection error: {0}")]
    PeerSelection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
