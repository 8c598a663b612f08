//! BlueChat CLI library
//!
//! Terminal front end for the BlueChat connection core: configuration,
//! transport selection, peer selection and the interactive chat loop.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod terminal;

pub use app::ChatApp;
pub use cli::{Cli, Commands, TransportKind};
pub use config::AppConfig;
pub use error::{CliError, Result};
