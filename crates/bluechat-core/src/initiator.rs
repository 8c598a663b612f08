//! Initiating role
//!
//! One outbound connection attempt. A successful connect is handed to the
//! [`SessionInstaller`]; any failure, including cancellation, is reported as
//! [`ChatEvent::ConnectFailed`]. There is no retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::ChatError;
use crate::events::{ChatEvent, EventReporter};
use crate::session::SessionInstaller;
use crate::transport::{CloseSignal, Transport};
use crate::types::{PeerHandle, ServiceId, SessionId, SessionOrigin};

/// Terminal result of an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiatorOutcome {
    Succeeded(SessionId),
    Failed(ChatError),
}

/// One-shot outbound connection attempt
pub struct Initiator {
    peer: PeerHandle,
    cancel: Arc<CloseSignal>,
    done: Arc<AtomicBool>,
    task: StdMutex<Option<JoinHandle<InitiatorOutcome>>>,
}

impl Initiator {
    /// Spawn the attempt towards `peer`
    pub fn start(
        transport: Arc<dyn Transport>,
        peer: PeerHandle,
        service: ServiceId,
        installer: Arc<dyn SessionInstaller>,
        reporter: EventReporter,
    ) -> Self {
        let cancel = Arc::new(CloseSignal::new());
        let done = Arc::new(AtomicBool::new(false));

        info!("Connecting to {} via {}", peer, transport.name());
        let attempt = Attempt {
            transport,
            peer: peer.clone(),
            service,
            installer,
            reporter,
            cancel: cancel.clone(),
            done: done.clone(),
        };

        Self {
            peer,
            cancel,
            done,
            task: StdMutex::new(Some(tokio::spawn(attempt.run()))),
        }
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// True once the connect has resolved either way
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Abort a pending connect; no effect once it has resolved
    pub fn cancel(&self) {
        if self.cancel.close() && !self.is_finished() {
            debug!("Cancelling connect to {}", self.peer);
        }
    }

    /// Wait for the attempt; `None` if it was already joined
    pub async fn join(&self) -> Option<InitiatorOutcome> {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Connect task for {} panicked: {}", self.peer, e);
                Some(InitiatorOutcome::Failed(ChatError::Transport(e.to_string())))
            }
        }
    }
}

struct Attempt {
    transport: Arc<dyn Transport>,
    peer: PeerHandle,
    service: ServiceId,
    installer: Arc<dyn SessionInstaller>,
    reporter: EventReporter,
    cancel: Arc<CloseSignal>,
    done: Arc<AtomicBool>,
}

impl Attempt {
    async fn run(self) -> InitiatorOutcome {
        let result = tokio::select! {
            biased;
            _ = self.cancel.closed() => Err(ChatError::Cancelled),
            result = self.transport.connect(&self.peer, self.service) => result,
        };

        let socket = match result {
            Ok(socket) if self.cancel.is_closed() => {
                socket.close().await;
                return self.fail(ChatError::Cancelled);
            }
            Ok(socket) => socket,
            Err(e) => return self.fail(e),
        };

        self.done.store(true, Ordering::SeqCst);
        match self
            .installer
            .install_session(socket, SessionOrigin::Outbound)
            .await
        {
            Ok(id) => {
                info!("Connected to {} as {}", self.peer, id);
                InitiatorOutcome::Succeeded(id)
            }
            Err(e) => {
                warn!("Connected to {} but install failed: {}", self.peer, e);
                InitiatorOutcome::Failed(e)
            }
        }
    }

    fn fail(&self, error: ChatError) -> InitiatorOutcome {
        self.done.store(true, Ordering::SeqCst);
        warn!("Connect to {} failed: {}", self.peer, error);
        self.reporter.emit(ChatEvent::ConnectFailed {
            peer: self.peer.clone(),
            error: error.clone(),
        });
        InitiatorOutcome::Failed(error)
    }
}
