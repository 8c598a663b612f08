//! Listening role
//!
//! Binds the chat service and accepts inbound sockets until cancelled,
//! handing each one to a [`SessionInstaller`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{ChatError, ChatResult};
use crate::events::{ChatEvent, EventReporter};
use crate::session::SessionInstaller;
use crate::transport::{ListenHandle, Transport};
use crate::types::{ServiceId, SessionOrigin};

/// Long-lived acceptor of inbound connections
pub struct Listener {
    handle: Arc<dyn ListenHandle>,
    running: Arc<AtomicBool>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// Bind `service` and spawn the accept loop
    ///
    /// A bind failure is reported as [`ChatEvent::ListenFailed`] and returned;
    /// no loop is started in that case.
    pub async fn start(
        transport: &dyn Transport,
        service: ServiceId,
        installer: Arc<dyn SessionInstaller>,
        reporter: EventReporter,
    ) -> ChatResult<Self> {
        let handle = match transport.listen(service).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to listen on {} ({}): {}", service, transport.name(), e);
                reporter.emit(ChatEvent::ListenFailed { error: e.clone() });
                return Err(e);
            }
        };

        info!("Listening on {}", handle.local_endpoint());
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(accept_loop(
            handle.clone(),
            installer,
            reporter,
            running.clone(),
        ));

        Ok(Self {
            handle,
            running,
            task: StdMutex::new(Some(task)),
        })
    }

    /// True until the loop is cancelled or fails
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.handle.is_closed()
    }

    pub fn local_endpoint(&self) -> String {
        self.handle.local_endpoint()
    }

    /// Close the listen handle; idempotent
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.handle.close();
    }

    /// Wait for the accept loop to finish
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Accept loop panicked: {}", e);
            }
        }
    }
}

async fn accept_loop(
    handle: Arc<dyn ListenHandle>,
    installer: Arc<dyn SessionInstaller>,
    reporter: EventReporter,
    running: Arc<AtomicBool>,
) {
    loop {
        let socket = match handle.accept().await {
            Ok(socket) => socket,
            Err(e) if matches!(e, ChatError::Cancelled) || handle.is_closed() => {
                debug!("Accept loop on {} cancelled ({})", handle.local_endpoint(), e);
                break;
            }
            Err(e) => {
                error!("Accept on {} failed: {}", handle.local_endpoint(), e);
                running.store(false, Ordering::SeqCst);
                handle.close();
                reporter.emit(ChatEvent::ListenFailed { error: e });
                break;
            }
        };

        info!("Accepted connection from {}", socket.peer());
        match installer.install_session(socket, SessionOrigin::Inbound).await {
            Ok(id) => debug!("Inbound connection installed as {}", id),
            Err(ChatError::Closed) => {
                debug!("Manager closed, accept loop exiting");
                break;
            }
            Err(e) => warn!("Failed to install inbound connection: {}", e),
        }
    }

    running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNetwork, Socket};
    use crate::types::{PeerHandle, SessionId};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::timeout;

    /// Installer that keeps every socket it is given
    #[derive(Default)]
    struct Collect {
        sockets: Mutex<Vec<Arc<dyn Socket>>>,
    }

    #[async_trait]
    impl SessionInstaller for Collect {
        async fn install_session(
            &self,
            socket: Arc<dyn Socket>,
            _origin: SessionOrigin,
        ) -> ChatResult<SessionId> {
            let mut sockets = self.sockets.lock().await;
            sockets.push(socket);
            Ok(SessionId(sockets.len() as u64))
        }
    }

    #[tokio::test]
    async fn accepts_repeatedly_until_cancelled() {
        let network = MemoryNetwork::new();
        let server = network.transport(PeerHandle::new("srv", "Server"));
        let client = network.transport(PeerHandle::new("cli", "Client"));
        let installer = Arc::new(Collect::default());
        let (reporter, mut events) = EventReporter::channel();

        let listener = Listener::start(
            &server,
            ServiceId::SERIAL_PORT,
            installer.clone(),
            reporter,
        )
        .await
        .unwrap();
        assert!(listener.is_running());

        for _ in 0..2 {
            client
                .connect(&PeerHandle::new("srv", "Server"), ServiceId::SERIAL_PORT)
                .await
                .unwrap();
        }
        timeout(Duration::from_secs(1), async {
            while installer.sockets.lock().await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both connections should be installed");

        listener.cancel();
        listener.cancel();
        timeout(Duration::from_secs(1), listener.join())
            .await
            .expect("accept loop must stop after cancel");
        assert!(!listener.is_running());
        // Every reporter clone went with the loop; no ListenFailed was queued.
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn cancel_right_after_start_is_silent() {
        let network = MemoryNetwork::new();
        let server = network.transport(PeerHandle::new("srv", "Server"));

        for _ in 0..50 {
            let (reporter, mut events) = EventReporter::channel();
            let listener = Listener::start(
                &server,
                ServiceId::SERIAL_PORT,
                Arc::new(Collect::default()),
                reporter,
            )
            .await
            .unwrap();
            tokio::task::yield_now().await;

            listener.cancel();
            timeout(Duration::from_secs(1), listener.join())
                .await
                .expect("accept loop must stop after cancel");
            drop(listener);
            // The loop's reporter is gone, so the stream ends without events.
            assert_eq!(events.recv().await, None);
        }
    }

    #[tokio::test]
    async fn bind_failure_reports_listen_failed() {
        let network = MemoryNetwork::new();
        let server = network.transport(PeerHandle::new("srv", "Server"));
        network.set_radio_enabled("srv", false);
        let (reporter, mut events) = EventReporter::channel();

        let result = Listener::start(
            &server,
            ServiceId::SERIAL_PORT,
            Arc::new(Collect::default()),
            reporter,
        )
        .await;
        assert!(matches!(result, Err(ChatError::TransportUnavailable { .. })));
        assert!(matches!(
            events.recv().await,
            Some(ChatEvent::ListenFailed {
                error: ChatError::TransportUnavailable { .. }
            })
        ));
    }

    #[tokio::test]
    async fn driver_fault_stops_loop() {
        let network = MemoryNetwork::new();
        let server = network.transport(PeerHandle::new("srv", "Server"));
        let (reporter, mut events) = EventReporter::channel();

        let listener = Listener::start(
            &server,
            ServiceId::SERIAL_PORT,
            Arc::new(Collect::default()),
            reporter,
        )
        .await
        .unwrap();
        assert!(network.fail_listener("srv", ServiceId::SERIAL_PORT, "adapter removed"));

        assert_eq!(
            events.recv().await,
            Some(ChatEvent::ListenFailed {
                error: ChatError::Transport("adapter removed".to_string())
            })
        );
        listener.join().await;
        assert!(!listener.is_running());
    }
}
