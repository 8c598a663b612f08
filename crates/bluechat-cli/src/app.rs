//! BlueChat application: transport selection and the interactive chat loop

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use bluechat_core::{
    ChatError, ChatEvent, ConnectionManager, ConnectionState, PeerDirectory, PeerHandle,
    StaticDirectory, TcpTransport, Transport,
};
use bluechat_rfcomm::RfcommTransport;

use crate::cli::TransportKind;
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::terminal::{self, Input};

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

/// Connection manager wired to the configured transport and peer directory
pub struct ChatApp {
    config: AppConfig,
    kind: TransportKind,
    manager: ConnectionManager,
    directory: Arc<dyn PeerDirectory>,
    /// Kept separately for adapter status queries
    rfcomm: Option<Arc<RfcommTransport>>,
}

impl ChatApp {
    /// Build the application for `config.transport`
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let kind = config.transport;

        let (transport, directory, rfcomm): (
            Arc<dyn Transport>,
            Arc<dyn PeerDirectory>,
            Option<Arc<RfcommTransport>>,
        ) = match kind {
            TransportKind::Tcp => (
                Arc::new(TcpTransport::new(config.tcp.bind_addr.clone())),
                Arc::new(StaticDirectory::new(config.peers.clone())),
                None,
            ),
            TransportKind::Rfcomm => {
                let rfcomm = Arc::new(RfcommTransport::new(config.rfcomm.clone())?);
                (rfcomm.clone(), rfcomm.clone(), Some(rfcomm))
            }
        };

        info!("Using {} transport", kind);
        let manager = ConnectionManager::new(transport, config.chat.clone())?;

        Ok(Self {
            config,
            kind,
            manager,
            directory,
            rfcomm,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    /// Paired peers in display order
    pub async fn paired_peers(&self) -> Result<Vec<PeerHandle>> {
        Ok(self.directory.paired_peers().await?)
    }

    /// Resolve a user-supplied address or 1-based index
    pub async fn resolve_peer(&self, target: &str) -> Result<PeerHandle> {
        let peers = self.paired_peers().await?;
        select_peer(&peers, target)
    }

    pub async fn start_listening(&self) -> Result<()> {
        self.manager.start_listening().await?;
        match self.manager.listening_endpoint().await {
            Some(endpoint) => println!("*** Listening on {}", endpoint),
            None => println!("*** Listening"),
        }
        Ok(())
    }

    /// Lines describing configuration, link state and adapter state
    pub async fn status_report(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Transport:  {}", self.kind),
            format!("Service ID: {}", self.config.chat.service_id),
            format!("State:      {}", self.manager.state()),
        ];
        if let Some(peer) = self.manager.current_peer().await {
            lines.push(format!("Peer:       {}", peer));
        }
        if let Some(endpoint) = self.manager.listening_endpoint().await {
            lines.push(format!("Endpoint:   {}", endpoint));
        }

        match (&self.rfcomm, self.kind) {
            (Some(rfcomm), _) => match rfcomm.adapter_status().await {
                Ok(status) => lines.push(format!(
                    "Adapter:    {} ({}) {}",
                    status.name,
                    status.address,
                    if status.powered { "powered" } else { "powered off" }
                )),
                Err(e) => lines.push(format!("Adapter:    unavailable: {}", e)),
            },
            (None, TransportKind::Tcp) => {
                lines.push(format!("Bind:       {}", self.config.tcp.bind_addr));
            }
            (None, TransportKind::Rfcomm) => {}
        }
        lines
    }

    /// Cancel all roles and wait for them
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    // ------------------------------------------------------------------------
    // Interactive Mode
    // ------------------------------------------------------------------------

    /// Chat on stdin/stdout until `/quit`, end of input or Ctrl+C
    ///
    /// With `initial` set, a connection attempt starts immediately. Every
    /// attempt is bounded by `connect_timeout_secs`.
    pub async fn run_interactive(&self, initial: Option<PeerHandle>) -> Result<()> {
        let mut events = self
            .manager
            .take_event_receiver()
            .ok_or_else(|| CliError::Config("event stream already taken".to_string()))?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut deadline: Option<Instant> = None;

        if let Some(peer) = initial {
            deadline = self.begin_connect(peer).await;
        }
        println!("Type /help for commands");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("stdin closed");
                        break;
                    };
                    match terminal::parse_input(&line) {
                        Input::Quit => break,
                        Input::Empty => {}
                        Input::Help => println!("{}", terminal::HELP),
                        Input::Invalid(message) => println!("{}", message),
                        Input::Send(text) => self.send_line(&text).await,
                        Input::Peers => match self.paired_peers().await {
                            Ok(peers) => println!("{}", terminal::render_peers(&peers)),
                            Err(e) => println!("*** {}", e),
                        },
                        Input::Status => {
                            for line in self.status_report().await {
                                println!("{}", line);
                            }
                        }
                        Input::Connect(target) => match self.resolve_peer(&target).await {
                            Ok(peer) => {
                                if let Some(at) = self.begin_connect(peer).await {
                                    deadline = Some(at);
                                }
                            }
                            Err(e) => println!("*** {}", e),
                        },
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event stream ended");
                        break;
                    };
                    if matches!(event, ChatEvent::Connected { .. } | ChatEvent::ConnectFailed { .. })
                        && self.manager.state() != ConnectionState::Connecting
                    {
                        deadline = None;
                    }
                    println!("{}", terminal::render_event(&event));
                }
                _ = wait_until(deadline) => {
                    deadline = None;
                    if self.manager.cancel_connect().await {
                        warn!(
                            "Connection attempt timed out after {}s",
                            self.config.connect_timeout_secs
                        );
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!("interrupted");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Start an outbound attempt; returns its deadline on success
    async fn begin_connect(&self, peer: PeerHandle) -> Option<Instant> {
        println!("*** Connecting to {}...", peer);
        match self.manager.connect_to(peer).await {
            Ok(()) => Some(Instant::now() + self.config.connect_timeout()),
            Err(e) => {
                println!("*** {}", e);
                None
            }
        }
    }

    async fn send_line(&self, text: &str) {
        match self.manager.send(text.as_bytes()).await {
            Ok(()) => println!("{}", terminal::render_sent(text)),
            Err(ChatError::NotConnected) => {
                println!("*** Not connected. Use /connect <address|index> or wait for a peer.")
            }
            Err(e) => println!("*** Send failed: {}", e),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ----------------------------------------------------------------------------
// Peer Selection
// ----------------------------------------------------------------------------

/// Pick a peer by 1-based index or address
///
/// Addresses not in the list are accepted as anonymous peers so a TCP host
/// can be reached without configuring it first.
pub fn select_peer(peers: &[PeerHandle], target: &str) -> Result<PeerHandle> {
    let target = target.trim();
    if target.is_empty() {
        return Err(CliError::PeerSelection("no peer given".to_string()));
    }

    if let Ok(index) = target.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| peers.get(i))
            .cloned()
            .ok_or_else(|| {
                CliError::PeerSelection(format!(
                    "no peer #{} ({} paired)",
                    index,
                    peers.len()
                ))
            });
    }

    Ok(peers
        .iter()
        .find(|p| p.address.eq_ignore_ascii_case(target) || p.name == target)
        .cloned()
        .unwrap_or_else(|| PeerHandle::anonymous(target)))
}
