//! TCP transport
//!
//! Emulates an RFCOMM link over TCP for hosts without a Bluetooth radio.
//! Peer addresses are `host:port` strings. Since TCP has no service
//! discovery, the initiator opens every connection with the 16 raw bytes of
//! the service UUID; the acceptor drops connections whose preamble does not
//! match and keeps accepting. Preambles are checked on a task per connection,
//! so a client that never sends one does not hold up the others.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{CloseSignal, ListenHandle, Socket, StreamSocket, Transport};
use crate::errors::{ChatError, ChatResult};
use crate::types::{PeerHandle, ServiceId};

/// Time an accepted connection has to send its service preamble
const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(5);

type TcpSocket = StreamSocket<OwnedReadHalf, OwnedWriteHalf>;

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// TCP stand-in for an RFCOMM radio
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_addr: String,
}

impl TcpTransport {
    /// Create a transport whose listener binds to `bind_addr`
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn listen(&self, service: ServiceId) -> ChatResult<Arc<dyn ListenHandle>> {
        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            ChatError::unavailable(format!("cannot bind {}: {}", self.bind_addr, e))
        })?;
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.bind_addr.clone());

        info!("TCP listener bound on {} for service {}", local, service);
        let closed = Arc::new(CloseSignal::new());
        let (verified_tx, verified_rx) = mpsc::unbounded_channel();
        tokio::spawn(accept_connections(
            listener,
            service,
            local.clone(),
            verified_tx,
            closed.clone(),
        ));

        Ok(Arc::new(TcpListenHandle {
            verified: Mutex::new(verified_rx),
            local,
            closed,
        }))
    }

    async fn connect(&self, peer: &PeerHandle, service: ServiceId) -> ChatResult<Arc<dyn Socket>> {
        let mut stream = TcpStream::connect(&peer.address)
            .await
            .map_err(|e| ChatError::connect_failed(&peer.address, e.to_string()))?;

        stream
            .write_all(service.as_bytes())
            .await
            .map_err(|e| ChatError::connect_failed(&peer.address, e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay on {} failed: {}", peer.address, e);
        }

        let (reader, writer) = stream.into_split();
        debug!("TCP link to {} established", peer);
        Ok(Arc::new(TcpSocket::new(peer.clone(), reader, writer)))
    }
}

// ----------------------------------------------------------------------------
// Accept Task
// ----------------------------------------------------------------------------

type Verified = ChatResult<TcpSocket>;

/// Accept connections until closed, checking each preamble on its own task
async fn accept_connections(
    listener: TcpListener,
    service: ServiceId,
    local: String,
    verified: mpsc::UnboundedSender<Verified>,
    closed: Arc<CloseSignal>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = closed.closed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                tokio::spawn(verify_preamble(
                    stream,
                    addr,
                    service,
                    verified.clone(),
                    closed.clone(),
                ));
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                ) =>
            {
                debug!("Inbound TCP connection aborted before accept: {}", e);
            }
            Err(e) => {
                let _ = verified.send(Err(ChatError::Transport(e.to_string())));
                break;
            }
        }
    }
    debug!("TCP accept task on {} stopped", local);
}

async fn verify_preamble(
    mut stream: TcpStream,
    addr: SocketAddr,
    service: ServiceId,
    verified: mpsc::UnboundedSender<Verified>,
    closed: Arc<CloseSignal>,
) {
    let mut preamble = [0u8; 16];
    let read = tokio::select! {
        biased;
        _ = closed.closed() => return,
        read = timeout(PREAMBLE_TIMEOUT, stream.read_exact(&mut preamble)) => read,
    };

    match read {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            warn!("Dropping {}: preamble read failed: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("Dropping {}: no preamble within {:?}", addr, PREAMBLE_TIMEOUT);
            return;
        }
    }

    if &preamble != service.as_bytes() {
        warn!(
            "Dropping {}: unexpected service id {}",
            addr,
            hex::encode(preamble)
        );
        return;
    }

    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay on {} failed: {}", addr, e);
    }
    let (reader, writer) = stream.into_split();
    let socket = TcpSocket::new(PeerHandle::anonymous(addr.to_string()), reader, writer);
    if verified.send(Ok(socket)).is_err() {
        debug!("Listener gone, dropping {}", addr);
    }
}

// ----------------------------------------------------------------------------
// Listen Handle
// ----------------------------------------------------------------------------

struct TcpListenHandle {
    verified: Mutex<mpsc::UnboundedReceiver<Verified>>,
    local: String,
    closed: Arc<CloseSignal>,
}

#[async_trait]
impl ListenHandle for TcpListenHandle {
    async fn accept(&self) -> ChatResult<Arc<dyn Socket>> {
        if self.closed.is_closed() {
            return Err(ChatError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(ChatError::Cancelled),
            item = async { self.verified.lock().await.recv().await } => match item {
                Some(Ok(socket)) => Ok(Arc::new(socket) as Arc<dyn Socket>),
                Some(Err(e)) => Err(e),
                None if self.closed.is_closed() => Err(ChatError::Cancelled),
                None => Err(ChatError::Transport("accept task stopped".to_string())),
            },
        }
    }

    fn close(&self) {
        if self.closed.close() {
            debug!("TCP listener on {} closed", self.local);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    fn local_endpoint(&self) -> String {
        self.local.clone()
    }
}
