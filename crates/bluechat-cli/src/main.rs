//! BlueChat CLI entry point

use clap::Parser;
use tracing::{error, info};

use bluechat_cli::{
    app::ChatApp, cli::Cli, commands::CommandDispatcher, config::AppConfig, error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = load_configuration(&cli)?;
    if let Some(transport) = cli.transport {
        config.transport = transport;
    }

    let app = match ChatApp::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = CommandDispatcher::execute(cli.command, app).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    info!("BlueChat exited");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        AppConfig::load_from_file(config_path)
    } else {
        info!("Using default configuration");
        Ok(AppConfig::default())
    }
}
