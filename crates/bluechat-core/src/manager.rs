//! Connection manager
//!
//! Owns the listener, the in-flight initiator and the single current
//! session. All mutation goes through one async lock; roles report back
//! through an [`EventReporter`] whose events are consumed by a relay task.
//! The relay updates the derived [`ConnectionState`], reaps roles that have
//! finished and forwards every event, in order, to the UI receiver.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::errors::{ChatError, ChatResult};
use crate::events::{ChatEvent, EventReceiver, EventReporter};
use crate::initiator::Initiator;
use crate::listener::Listener;
use crate::session::{Session, SessionInstaller};
use crate::transport::{CloseSignal, Socket, Transport};
use crate::types::{ConnectionState, PeerHandle, SessionId, SessionOrigin};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Core {
    listener: Option<Arc<Listener>>,
    initiator: Option<Arc<Initiator>>,
    session: Option<Arc<Session>>,
    next_session: u64,
    closed: bool,
}

impl Core {
    fn derive_state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if self.initiator.as_ref().is_some_and(|i| !i.is_finished()) {
            ConnectionState::Connecting
        } else if self.session.as_ref().is_some_and(|s| s.is_open()) {
            ConnectionState::Connected
        } else if self.listener.as_ref().is_some_and(|l| l.is_running()) {
            ConnectionState::Listening
        } else {
            ConnectionState::Idle
        }
    }

    fn can_listen(&self) -> ChatResult<()> {
        if self.closed {
            return Err(ChatError::Closed);
        }
        if self.listener.as_ref().is_some_and(|l| l.is_running()) {
            return Err(ChatError::AlreadyListening);
        }
        Ok(())
    }
}

/// Roles removed from [`Core`] that still need to be joined
#[derive(Default)]
struct Reaped {
    listener: Option<Arc<Listener>>,
    initiator: Option<Arc<Initiator>>,
    session: Option<Arc<Session>>,
}

impl Reaped {
    async fn join(self) {
        if let Some(listener) = self.listener {
            listener.join().await;
        }
        if let Some(initiator) = self.initiator {
            initiator.join().await;
        }
        if let Some(session) = self.session {
            session.join().await;
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: ChatConfig,
    core: Mutex<Core>,
    reporter: EventReporter,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn refresh_state(&self, core: &Core) {
        let next = core.derive_state();
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!("Connection state {} -> {}", state, next);
            *state = next;
            true
        });
    }

    /// Update state for a role event and reap the role it finished
    async fn observe(&self, event: &ChatEvent) {
        let mut reaped = Reaped::default();
        {
            let mut core = self.core.lock().await;
            match event {
                ChatEvent::SessionEnded { session, .. } => {
                    if core.session.as_ref().map(|s| s.id()) == Some(*session) {
                        reaped.session = core.session.take();
                    }
                }
                ChatEvent::Connected { .. } | ChatEvent::ConnectFailed { .. } => {
                    if core.initiator.as_ref().is_some_and(|i| i.is_finished()) {
                        reaped.initiator = core.initiator.take();
                    }
                }
                ChatEvent::ListenFailed { .. } => {
                    if core.listener.as_ref().is_some_and(|l| !l.is_running()) {
                        reaped.listener = core.listener.take();
                    }
                }
                ChatEvent::MessageReceived { .. } => {}
            }
            self.refresh_state(&core);
        }
        reaped.join().await;
    }
}

#[async_trait]
impl SessionInstaller for Shared {
    async fn install_session(
        &self,
        socket: Arc<dyn Socket>,
        origin: SessionOrigin,
    ) -> ChatResult<SessionId> {
        let mut core = self.core.lock().await;
        if core.closed {
            drop(core);
            debug!("Manager closed, dropping connection from {}", socket.peer());
            socket.close().await;
            return Err(ChatError::Closed);
        }

        if let Some(previous) = core.session.take() {
            info!("{} superseded by new connection from {}", previous.id(), socket.peer());
            previous.cancel().await;
            previous.join().await;
        }

        core.next_session += 1;
        let id = SessionId(core.next_session);
        let session = Arc::new(Session::new(
            id,
            socket,
            origin,
            &self.config,
            self.reporter.clone(),
        ));

        self.reporter.emit(ChatEvent::Connected {
            session: id,
            peer: session.peer().clone(),
            origin,
        });
        session.start();
        core.session = Some(session);
        self.refresh_state(&core);
        Ok(id)
    }
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Coordinator enforcing at most one active session
///
/// Must be created inside a tokio runtime. Call [`ConnectionManager::shutdown`]
/// before dropping it so every task is joined.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    events: StdMutex<Option<EventReceiver>>,
    relay: Mutex<Option<JoinHandle<()>>>,
    relay_stop: Arc<CloseSignal>,
}

impl ConnectionManager {
    /// Create a manager over `transport` and spawn its event relay
    pub fn new(transport: Arc<dyn Transport>, config: ChatConfig) -> ChatResult<Self> {
        config.validate()?;

        let (reporter, inbox) = EventReporter::channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        info!(
            "Connection manager created (transport: {}, service: {})",
            transport.name(),
            config.service_id
        );
        let shared = Arc::new(Shared {
            transport,
            config,
            core: Mutex::new(Core::default()),
            reporter,
            state_tx,
        });

        let relay_stop = Arc::new(CloseSignal::new());
        let relay = tokio::spawn(relay_events(
            shared.clone(),
            inbox,
            ui_tx,
            relay_stop.clone(),
        ));

        Ok(Self {
            shared,
            events: StdMutex::new(Some(ui_rx)),
            relay: Mutex::new(Some(relay)),
            relay_stop,
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.shared.config
    }

    pub fn transport_name(&self) -> &'static str {
        self.shared.transport.name()
    }

    /// Take the UI event stream; `None` after the first call
    pub fn take_event_receiver(&self) -> Option<EventReceiver> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Peer of the current session, if one is open
    pub async fn current_peer(&self) -> Option<PeerHandle> {
        let core = self.shared.core.lock().await;
        core.session
            .as_ref()
            .filter(|s| s.is_open())
            .map(|s| s.peer().clone())
    }

    /// Endpoint the listener is bound to, if it is running
    pub async fn listening_endpoint(&self) -> Option<String> {
        let core = self.shared.core.lock().await;
        core.listener
            .as_ref()
            .filter(|l| l.is_running())
            .map(|l| l.local_endpoint())
    }

    /// Make `socket` the current session
    ///
    /// The previous session is closed and its read loop joined first. After
    /// shutdown the socket is closed and [`ChatError::Closed`] returned.
    pub async fn install_session(
        &self,
        socket: Arc<dyn Socket>,
        origin: SessionOrigin,
    ) -> ChatResult<SessionId> {
        self.shared.install_session(socket, origin).await
    }

    /// Start accepting inbound connections
    ///
    /// The service is bound without holding the manager lock, so sends and
    /// installs proceed while the transport registers it.
    pub async fn start_listening(&self) -> ChatResult<()> {
        self.shared.core.lock().await.can_listen()?;

        let listener = Arc::new(
            Listener::start(
                self.shared.transport.as_ref(),
                self.shared.config.service_id,
                self.shared.clone(),
                self.shared.reporter.clone(),
            )
            .await?,
        );

        let (installed, stale) = {
            let mut core = self.shared.core.lock().await;
            match core.can_listen() {
                Ok(()) => {
                    let stale = core.listener.replace(listener.clone());
                    self.shared.refresh_state(&core);
                    (Ok(()), stale)
                }
                Err(e) => (Err(e), None),
            }
        };

        if installed.is_err() {
            debug!("Discarding listener bound while the manager changed");
            listener.cancel();
            listener.join().await;
        }
        if let Some(stale) = stale {
            stale.join().await;
        }
        installed
    }

    /// Start an outbound attempt, cancelling any attempt still in flight
    pub async fn connect_to(&self, peer: PeerHandle) -> ChatResult<()> {
        let previous = {
            let mut core = self.shared.core.lock().await;
            if core.closed {
                return Err(ChatError::Closed);
            }

            let previous = core.initiator.take();
            if let Some(previous) = &previous {
                previous.cancel();
            }
            core.initiator = Some(Arc::new(Initiator::start(
                self.shared.transport.clone(),
                peer,
                self.shared.config.service_id,
                self.shared.clone(),
                self.shared.reporter.clone(),
            )));
            self.shared.refresh_state(&core);
            previous
        };

        if let Some(previous) = previous {
            previous.join().await;
        }
        Ok(())
    }

    /// Cancel the in-flight attempt; returns whether one was pending
    pub async fn cancel_connect(&self) -> bool {
        let initiator = self.shared.core.lock().await.initiator.clone();
        match initiator {
            Some(initiator) if !initiator.is_finished() => {
                initiator.cancel();
                true
            }
            _ => false,
        }
    }

    /// Send one message on the current session
    pub async fn send(&self, payload: &[u8]) -> ChatResult<()> {
        let session = {
            let core = self.shared.core.lock().await;
            if core.derive_state() != ConnectionState::Connected {
                return Err(ChatError::NotConnected);
            }
            core.session.clone()
        };

        match session {
            Some(session) => session.send(payload).await,
            None => Err(ChatError::NotConnected),
        }
    }

    /// Stop every role and wait for all tasks; idempotent
    pub async fn shutdown(&self) {
        let mut relay = self.relay.lock().await;

        let reaped = {
            let mut core = self.shared.core.lock().await;
            if !core.closed {
                info!("Shutting down connection manager");
            }
            core.closed = true;
            let reaped = Reaped {
                listener: core.listener.take(),
                initiator: core.initiator.take(),
                session: core.session.take(),
            };
            self.shared.refresh_state(&core);
            reaped
        };

        if let Some(listener) = &reaped.listener {
            listener.cancel();
        }
        if let Some(initiator) = &reaped.initiator {
            initiator.cancel();
        }
        if let Some(session) = &reaped.session {
            session.cancel().await;
        }
        reaped.join().await;

        self.relay_stop.close();
        if let Some(task) = relay.take() {
            if let Err(e) = task.await {
                warn!("Event relay panicked: {}", e);
            }
            debug!("Connection manager stopped");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        warn!("Connection manager dropped without shutdown");

        let relay = self.relay.get_mut().take();
        let shared = self.shared.clone();
        let stop = self.relay_stop.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let reaped = {
                    let mut core = shared.core.lock().await;
                    core.closed = true;
                    Reaped {
                        listener: core.listener.take(),
                        initiator: core.initiator.take(),
                        session: core.session.take(),
                    }
                };
                if let Some(listener) = &reaped.listener {
                    listener.cancel();
                }
                if let Some(initiator) = &reaped.initiator {
                    initiator.cancel();
                }
                if let Some(session) = &reaped.session {
                    session.cancel().await;
                }
                reaped.join().await;
                stop.close();
            });
        } else if let Some(relay) = relay {
            relay.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Event Relay
// ----------------------------------------------------------------------------

async fn relay_events(
    shared: Arc<Shared>,
    mut inbox: EventReceiver,
    ui: mpsc::UnboundedSender<ChatEvent>,
    stop: Arc<CloseSignal>,
) {
    let forward = |event: ChatEvent| {
        if ui.send(event).is_err() {
            debug!("UI event receiver dropped");
        }
    };

    loop {
        let event = tokio::select! {
            biased;
            event = inbox.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = stop.closed() => break,
        };
        shared.observe(&event).await;
        forward(event);
    }

    // Roles are joined before the stop signal, so this drains their last events.
    while let Ok(event) = inbox.try_recv() {
        shared.observe(&event).await;
        forward(event);
    }
    debug!("Event relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ListenHandle, MemoryNetwork, MemoryTransport};
    use crate::types::ServiceId;
    use std::time::Duration;

    fn manager(network: &MemoryNetwork, address: &str) -> ConnectionManager {
        let transport = Arc::new(network.transport(PeerHandle::new(address, address)));
        ConnectionManager::new(transport, ChatConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn starts_idle_and_rejects_send() {
        let network = MemoryNetwork::new();
        let manager = manager(&network, "a");
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.send(b"hi").await, Err(ChatError::NotConnected));
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.take_event_receiver().is_some());
        assert!(manager.take_event_receiver().is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.transport(PeerHandle::new("a", "a")));
        let config = ChatConfig::default().with_read_buffer_size(0);
        assert!(matches!(
            ConnectionManager::new(transport, config),
            Err(ChatError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn listening_twice_fails() {
        let network = MemoryNetwork::new();
        let manager = manager(&network, "a");
        manager.start_listening().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Listening);
        assert_eq!(
            manager.start_listening().await,
            Err(ChatError::AlreadyListening)
        );
        assert!(manager.listening_endpoint().await.is_some());
        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn listening_resumes_after_listener_fault() {
        let network = MemoryNetwork::new();
        let manager = manager(&network, "a");
        let mut events = manager.take_event_receiver().unwrap();

        manager.start_listening().await.unwrap();
        assert!(network.fail_listener("a", ServiceId::SERIAL_PORT, "adapter reset"));
        assert!(matches!(
            events.recv().await,
            Some(ChatEvent::ListenFailed { .. })
        ));
        assert_eq!(manager.state(), ConnectionState::Idle);

        manager.start_listening().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Listening);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn send_is_not_held_up_by_a_slow_bind() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(SlowBind {
            inner: network.transport(PeerHandle::new("a", "a")),
            gate: tokio::sync::Notify::new(),
        });
        let manager =
            Arc::new(ConnectionManager::new(transport.clone(), ChatConfig::default()).unwrap());

        let listening = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.start_listening().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let send = tokio::time::timeout(Duration::from_millis(500), manager.send(b"hi"))
            .await
            .expect("send must not wait for the bind");
        assert_eq!(send, Err(ChatError::NotConnected));

        transport.gate.notify_one();
        listening.await.unwrap().unwrap();
        assert_eq!(manager.state(), ConnectionState::Listening);
        manager.shutdown().await;
    }

    /// Transport whose `listen` waits for a signal before binding
    struct SlowBind {
        inner: MemoryTransport,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl Transport for SlowBind {
        fn name(&self) -> &'static str {
            "slow-bind"
        }

        async fn listen(&self, service: ServiceId) -> ChatResult<Arc<dyn ListenHandle>> {
            self.gate.notified().await;
            self.inner.listen(service).await
        }

        async fn connect(
            &self,
            peer: &PeerHandle,
            service: ServiceId,
        ) -> ChatResult<Arc<dyn Socket>> {
            self.inner.connect(peer, service).await
        }
    }

    #[tokio::test]
    async fn commands_after_shutdown_fail_closed() {
        let network = MemoryNetwork::new();
        let manager = manager(&network, "a");
        manager.shutdown().await;
        manager.shutdown().await;

        assert_eq!(manager.start_listening().await, Err(ChatError::Closed));
        assert_eq!(
            manager.connect_to(PeerHandle::new("b", "b")).await,
            Err(ChatError::Closed)
        );
        assert!(!manager.cancel_connect().await);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
