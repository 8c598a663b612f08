//! Shared helpers for connection lifecycle tests
//!
//! A [`Device`] is a connection manager attached to a [`MemoryNetwork`]
//! together with its UI event stream.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bluechat_core::*;
use tokio::time::timeout;

/// Upper bound for anything a test waits on
pub const STEP: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Simulated Device
// ----------------------------------------------------------------------------

pub struct Device {
    pub handle: PeerHandle,
    pub manager: ConnectionManager,
    pub events: EventReceiver,
}

impl Device {
    pub fn new(network: &MemoryNetwork, address: &str) -> Self {
        Self::with_config(network, address, ChatConfig::default())
    }

    pub fn with_config(network: &MemoryNetwork, address: &str, config: ChatConfig) -> Self {
        let handle = PeerHandle::new(address, format!("Device {}", address.to_uppercase()));
        let transport = Arc::new(network.transport(handle.clone()));
        let manager = ConnectionManager::new(transport, config).expect("valid config");
        let events = manager.take_event_receiver().expect("fresh manager");
        Self {
            handle,
            manager,
            events,
        }
    }

    /// Next UI event, failing the test if none arrives in time
    pub async fn next_event(&mut self) -> ChatEvent {
        timeout(STEP, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    /// Assert that no event is pending after a short grace period
    pub async fn assert_quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(event) = self.events.try_recv() {
            panic!("unexpected event {:?}", event);
        }
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.manager.watch_state();
        timeout(STEP, rx.wait_for(|s| *s == state))
            .await
            .unwrap_or_else(|_| panic!("state never became {}", state))
            .expect("state sender dropped");
    }

    /// Wait for `Connected` and return its session id
    pub async fn expect_connected(&mut self) -> SessionId {
        match self.next_event().await {
            ChatEvent::Connected { session, .. } => session,
            other => panic!("expected Connected, got {:?}", other),
        }
    }

    /// Wait for a message and return its text and order
    pub async fn expect_message(&mut self) -> (String, u64) {
        match self.next_event().await {
            ChatEvent::MessageReceived { message, .. } => (message.text(), message.order),
            other => panic!("expected MessageReceived, got {:?}", other),
        }
    }

    pub async fn expect_session_ended(&mut self) -> (SessionId, EndReason) {
        match self.next_event().await {
            ChatEvent::SessionEnded {
                session, reason, ..
            } => (session, reason),
            other => panic!("expected SessionEnded, got {:?}", other),
        }
    }
}

/// Start `server` listening and connect `client` to it
pub async fn connect_pair(server: &mut Device, client: &mut Device) -> (SessionId, SessionId) {
    server.manager.start_listening().await.expect("listen");
    client
        .manager
        .connect_to(server.handle.clone())
        .await
        .expect("connect_to");

    let client_session = client.expect_connected().await;
    let server_session = server.expect_connected().await;
    (server_session, client_session)
}

// ----------------------------------------------------------------------------
// Raw Links
// ----------------------------------------------------------------------------

/// Open `count` links on a private network; returns (near, far) socket pairs
pub async fn raw_links(count: usize) -> Vec<(Arc<dyn Socket>, Arc<dyn Socket>)> {
    let network = MemoryNetwork::new();
    let acceptor_side = network.transport(PeerHandle::new("raw-a", "Raw A"));
    let connector = network.transport(PeerHandle::new("raw-b", "Raw B"));
    let acceptor = acceptor_side
        .listen(ServiceId::SERIAL_PORT)
        .await
        .expect("raw listen");

    let mut links = Vec::with_capacity(count);
    for _ in 0..count {
        let near = connector
            .connect(acceptor_side.local(), ServiceId::SERIAL_PORT)
            .await
            .expect("raw connect");
        let far = acceptor.accept().await.expect("raw accept");
        links.push((near, far));
    }
    links
}

/// Read one frame from a raw socket
pub async fn read_frame(socket: &Arc<dyn Socket>, decoder: &mut FrameDecoder) -> Vec<u8> {
    let mut buf = [0u8; 256];
    loop {
        if let Some(frame) = decoder.next_frame().expect("valid frame") {
            return frame;
        }
        let n = timeout(STEP, socket.read(&mut buf))
            .await
            .expect("timed out reading frame")
            .expect("read");
        decoder.extend(&buf[..n]);
    }
}
