//! In-process transport
//!
//! A [`MemoryNetwork`] stands in for the radio environment shared by several
//! simulated devices. Each device gets its own [`MemoryTransport`]; sockets
//! are tokio duplex pipes, so they behave like real stream sockets
//! (arbitrary splitting, EOF on remote close). The network can also inject
//! the failures a real driver produces.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info};

use super::{CloseSignal, ListenHandle, PeerDirectory, Socket, StreamSocket, Transport};
use crate::errors::{ChatError, ChatResult};
use crate::types::{PeerHandle, ServiceId};

/// Pipe capacity of a simulated link
const LINK_BUFFER_SIZE: usize = 16 * 1024;

type AcceptItem = ChatResult<Arc<dyn Socket>>;

// ----------------------------------------------------------------------------
// Network
// ----------------------------------------------------------------------------

#[derive(Default)]
struct NetworkState {
    /// Devices in registration order
    devices: Vec<PeerHandle>,
    radio_off: HashSet<String>,
    stalled: HashSet<String>,
    acceptors: HashMap<(String, ServiceId), mpsc::UnboundedSender<AcceptItem>>,
    links: HashMap<String, Vec<Weak<MemorySocket>>>,
}

/// Shared simulated radio environment
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and return its transport
    pub fn transport(&self, local: PeerHandle) -> MemoryTransport {
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d.address == local.address) {
            state.devices.push(local.clone());
        }
        MemoryTransport {
            network: self.clone(),
            local,
        }
    }

    /// Power a device's radio on or off
    ///
    /// Existing links are unaffected; new listen/connect calls fail.
    pub fn set_radio_enabled(&self, address: &str, enabled: bool) {
        let mut state = self.lock();
        if enabled {
            state.radio_off.remove(address);
        } else {
            state.radio_off.insert(address.to_string());
        }
    }

    /// Make connects towards `address` hang until cancelled
    pub fn stall_connects(&self, address: &str, stalled: bool) {
        let mut state = self.lock();
        if stalled {
            state.stalled.insert(address.to_string());
        } else {
            state.stalled.remove(address);
        }
    }

    /// Deliver a driver failure to the acceptor bound at `address`
    pub fn fail_listener(&self, address: &str, service: ServiceId, reason: &str) -> bool {
        let state = self.lock();
        match state.acceptors.get(&(address.to_string(), service)) {
            Some(tx) => tx.send(Err(ChatError::Transport(reason.to_string()))).is_ok(),
            None => false,
        }
    }

    /// Fail every live socket owned by `address` with a driver error
    pub fn break_links(&self, address: &str, reason: &str) -> usize {
        let sockets: Vec<Arc<MemorySocket>> = {
            let mut state = self.lock();
            let Some(links) = state.links.get_mut(address) else {
                return 0;
            };
            links.retain(|weak| weak.strong_count() > 0);
            links.iter().filter_map(Weak::upgrade).collect()
        };

        for socket in &sockets {
            socket.inject_fault(ChatError::Transport(reason.to_string()));
        }
        sockets.len()
    }

    /// Number of open sockets owned by `address`
    pub fn open_links(&self, address: &str) -> usize {
        let state = self.lock();
        state
            .links
            .get(address)
            .map(|links| {
                links
                    .iter()
                    .filter_map(Weak::upgrade)
                    .filter(|s| !s.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        // A poisoned lock only means a test panicked mid-update; the maps stay usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn radio_enabled(&self, address: &str) -> bool {
        !self.lock().radio_off.contains(address)
    }

    fn track(&self, owner: &str, socket: &Arc<MemorySocket>) {
        let mut state = self.lock();
        let links = state.links.entry(owner.to_string()).or_default();
        links.retain(|weak| weak.strong_count() > 0);
        links.push(Arc::downgrade(socket));
    }

    /// Number of link entries tracked for `address`, dead or alive
    #[cfg(test)]
    fn tracked_links(&self, address: &str) -> usize {
        self.lock().links.get(address).map(Vec::len).unwrap_or(0)
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// One simulated device on a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: PeerHandle,
}

impl MemoryTransport {
    pub fn local(&self) -> &PeerHandle {
        &self.local
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn listen(&self, service: ServiceId) -> ChatResult<Arc<dyn ListenHandle>> {
        if !self.network.radio_enabled(&self.local.address) {
            return Err(ChatError::unavailable(format!(
                "radio of {} is disabled",
                self.local.address
            )));
        }

        let key = (self.local.address.clone(), service);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.network.lock();
            if let Some(existing) = state.acceptors.get(&key) {
                if !existing.is_closed() {
                    return Err(ChatError::unavailable(format!(
                        "service {} already bound on {}",
                        service, self.local.address
                    )));
                }
            }
            state.acceptors.insert(key.clone(), tx);
        }

        info!("Memory listener bound: {} / {}", self.local.address, service);
        Ok(Arc::new(MemoryListenHandle {
            network: self.network.clone(),
            key,
            incoming: AsyncMutex::new(rx),
            closed: CloseSignal::new(),
        }))
    }

    async fn connect(&self, peer: &PeerHandle, service: ServiceId) -> ChatResult<Arc<dyn Socket>> {
        if !self.network.radio_enabled(&self.local.address) {
            return Err(ChatError::unavailable(format!(
                "radio of {} is disabled",
                self.local.address
            )));
        }

        let stalled = self.network.lock().stalled.contains(&peer.address);
        if stalled {
            debug!("Connect to {} stalled", peer);
            futures::future::pending::<()>().await;
        }

        if !self.network.radio_enabled(&peer.address) {
            return Err(ChatError::connect_failed(&peer.address, "host is down"));
        }

        let acceptor = self
            .network
            .lock()
            .acceptors
            .get(&(peer.address.clone(), service))
            .cloned()
            .ok_or_else(|| ChatError::connect_failed(&peer.address, "service not found"))?;

        let (near, far) = tokio::io::duplex(LINK_BUFFER_SIZE);
        let near = MemorySocket::new(peer.clone(), near);
        let far = MemorySocket::new(self.local.clone(), far);
        self.network.track(&self.local.address, &near);
        self.network.track(&peer.address, &far);

        acceptor
            .send(Ok(far as Arc<dyn Socket>))
            .map_err(|_| ChatError::connect_failed(&peer.address, "connection refused"))?;

        debug!("Memory link {} -> {} established", self.local.address, peer.address);
        Ok(near as Arc<dyn Socket>)
    }
}

#[async_trait]
impl PeerDirectory for MemoryTransport {
    async fn paired_peers(&self) -> ChatResult<Vec<PeerHandle>> {
        let state = self.network.lock();
        Ok(state
            .devices
            .iter()
            .filter(|d| d.address != self.local.address)
            .cloned()
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Listen Handle
// ----------------------------------------------------------------------------

struct MemoryListenHandle {
    network: MemoryNetwork,
    key: (String, ServiceId),
    incoming: AsyncMutex<mpsc::UnboundedReceiver<AcceptItem>>,
    closed: CloseSignal,
}

#[async_trait]
impl ListenHandle for MemoryListenHandle {
    async fn accept(&self) -> ChatResult<Arc<dyn Socket>> {
        if self.closed.is_closed() {
            return Err(ChatError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.closed.closed() => Err(ChatError::Cancelled),
            item = async { self.incoming.lock().await.recv().await } => match item {
                Some(result) => result,
                // close() drops the sender, so a closed channel is a cancel
                None if self.closed.is_closed() => Err(ChatError::Cancelled),
                None => Err(ChatError::Transport("acceptor unregistered".to_string())),
            },
        }
    }

    fn close(&self) {
        if self.closed.close() {
            self.network.lock().acceptors.remove(&self.key);
            debug!("Memory listener closed: {} / {}", self.key.0, self.key.1);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    fn local_endpoint(&self) -> String {
        format!("memory://{}/{}", self.key.0, self.key.1)
    }
}

// ----------------------------------------------------------------------------
// Socket
// ----------------------------------------------------------------------------

/// One end of a simulated link
pub struct MemorySocket {
    stream: StreamSocket<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>,
    fault: Mutex<Option<ChatError>>,
    faulted: CloseSignal,
}

impl MemorySocket {
    fn new(peer: PeerHandle, stream: DuplexStream) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        Arc::new(Self {
            stream: StreamSocket::new(peer, reader, writer),
            fault: Mutex::new(None),
            faulted: CloseSignal::new(),
        })
    }

    fn inject_fault(&self, error: ChatError) {
        *self.fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
        self.faulted.close();
    }

    fn fault(&self) -> ChatError {
        self.fault
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| ChatError::Transport("link fault".to_string()))
    }
}

#[async_trait]
impl Socket for MemorySocket {
    fn peer(&self) -> &PeerHandle {
        self.stream.peer()
    }

    async fn read(&self, buf: &mut [u8]) -> ChatResult<usize> {
        tokio::select! {
            biased;
            _ = self.faulted.closed() => Err(self.fault()),
            result = self.stream.read(buf) => result,
        }
    }

    async fn write(&self, data: &[u8]) -> ChatResult<()> {
        if self.faulted.is_closed() {
            return Err(self.fault());
        }
        self.stream.write(data).await
    }

    async fn close(&self) {
        self.stream.close().await;
    }

    fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }
}
