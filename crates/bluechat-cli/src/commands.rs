//! Command handlers for the BlueChat CLI

use tracing::info;

use crate::app::ChatApp;
use crate::cli::Commands;
use crate::error::Result;
use crate::terminal;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, app: ChatApp) -> Result<()> {
        let result = match command {
            Commands::Listen => Self::handle_listen_command(&app).await,
            Commands::Connect { target } => Self::handle_connect_command(&app, &target).await,
            Commands::Peers => Self::handle_peers_command(&app).await,
            Commands::Status => Self::handle_status_command(&app).await,
        };

        app.shutdown().await;
        result
    }

    /// Listen for an inbound peer, then chat
    async fn handle_listen_command(app: &ChatApp) -> Result<()> {
        app.start_listening().await?;
        app.run_interactive(None).await
    }

    /// Connect to a peer, then chat
    async fn handle_connect_command(app: &ChatApp, target: &str) -> Result<()> {
        let peer = app.resolve_peer(target).await?;
        info!("Connecting to {}", peer);
        app.run_interactive(Some(peer)).await
    }

    async fn handle_peers_command(app: &ChatApp) -> Result<()> {
        let peers = app.paired_peers().await?;
        println!("Paired peers ({} transport):", app.transport_kind());
        println!("{}", terminal::render_peers(&peers));
        Ok(())
    }

    async fn handle_status_command(app: &ChatApp) -> Result<()> {
        println!("BlueChat Status");
        println!("===============");
        for line in app.status_report().await {
            println!("{}", line);
        }
        Ok(())
    }
}
