//! Active data session
//!
//! A [`Session`] owns one established socket. Its read loop runs on a
//! dedicated task, decodes frames and reports each one as a
//! [`ChatEvent::MessageReceived`]; writes are serialized by a per-session
//! lock and may run concurrently with the read loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::errors::{ChatError, ChatResult};
use crate::events::{ChatEvent, EndReason, EventReporter};
use crate::framing::{encode_frame, FrameDecoder};
use crate::transport::Socket;
use crate::types::{InboundMessage, PeerHandle, SessionId, SessionOrigin};

// ----------------------------------------------------------------------------
// Session Installer
// ----------------------------------------------------------------------------

/// Receiver of freshly established sockets
///
/// Implemented by the connection manager; the listener and initiator hand
/// every socket they obtain to it.
#[async_trait]
pub trait SessionInstaller: Send + Sync {
    /// Make `socket` the current session, superseding any previous one
    async fn install_session(
        &self,
        socket: Arc<dyn Socket>,
        origin: SessionOrigin,
    ) -> ChatResult<SessionId>;
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// One live socket plus its receive loop
pub struct Session {
    id: SessionId,
    origin: SessionOrigin,
    socket: Arc<dyn Socket>,
    reporter: EventReporter,
    max_frame_len: usize,
    read_buffer_size: usize,
    write_lock: Mutex<()>,
    cancelled: Arc<AtomicBool>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Wrap `socket`; the read loop does not run until [`Session::start`]
    pub fn new(
        id: SessionId,
        socket: Arc<dyn Socket>,
        origin: SessionOrigin,
        config: &ChatConfig,
        reporter: EventReporter,
    ) -> Self {
        Self {
            id,
            origin,
            socket,
            reporter,
            max_frame_len: config.max_frame_len,
            read_buffer_size: config.read_buffer_size,
            write_lock: Mutex::new(()),
            cancelled: Arc::new(AtomicBool::new(false)),
            task: StdMutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &PeerHandle {
        self.socket.peer()
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    /// Open iff the underlying socket is open
    pub fn is_open(&self) -> bool {
        !self.socket.is_closed()
    }

    /// Spawn the read loop; later calls are no-ops
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }

        let reader = ReadLoop {
            id: self.id,
            socket: self.socket.clone(),
            reporter: self.reporter.clone(),
            decoder: FrameDecoder::new(self.max_frame_len),
            buffer: vec![0u8; self.read_buffer_size],
            cancelled: self.cancelled.clone(),
        };
        *task = Some(tokio::spawn(reader.run()));
        info!("{} started with {} ({:?})", self.id, self.peer(), self.origin);
    }

    /// Send one message as a single frame
    pub async fn send(&self, payload: &[u8]) -> ChatResult<()> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }
        let frame = encode_frame(payload, self.max_frame_len)?;

        let _guard = self.write_lock.lock().await;
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }

        match self.socket.write(&frame).await {
            Ok(()) => {
                debug!("{} sent {} bytes", self.id, payload.len());
                Ok(())
            }
            // Closed under us by a cancel or supersede
            Err(ChatError::Disconnected) if self.cancelled.load(Ordering::SeqCst) => {
                Err(ChatError::NotConnected)
            }
            Err(e) => {
                warn!("{} write failed: {}", self.id, e);
                // Let the read loop observe the failure and end the session.
                self.socket.close().await;
                Err(e)
            }
        }
    }

    /// Close the socket; the read loop ends with [`EndReason::Cancelled`]
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.socket.close().await;
    }

    /// Wait for the read loop to finish
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("{} read loop panicked: {}", self.id, e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Read Loop
// ----------------------------------------------------------------------------

struct ReadLoop {
    id: SessionId,
    socket: Arc<dyn Socket>,
    reporter: EventReporter,
    decoder: FrameDecoder,
    buffer: Vec<u8>,
    cancelled: Arc<AtomicBool>,
}

impl ReadLoop {
    async fn run(mut self) {
        let mut order = 0u64;

        let reason = 'read: loop {
            let n = match self.socket.read(&mut self.buffer).await {
                Ok(n) => n,
                Err(ChatError::Disconnected) | Err(ChatError::Cancelled) => {
                    if self.cancelled.load(Ordering::SeqCst) {
                        break 'read EndReason::Cancelled;
                    }
                    break 'read EndReason::PeerClosed;
                }
                Err(e) => break 'read EndReason::Failed(e),
            };

            self.decoder.extend(&self.buffer[..n]);
            loop {
                match self.decoder.next_frame() {
                    Ok(Some(payload)) => {
                        order += 1;
                        self.reporter.emit(ChatEvent::MessageReceived {
                            session: self.id,
                            peer: self.socket.peer().clone(),
                            message: InboundMessage { payload, order },
                        });
                    }
                    Ok(None) => break,
                    Err(e) => break 'read EndReason::Failed(e),
                }
            }
        };

        self.socket.close().await;
        match &reason {
            EndReason::Failed(e) => warn!("{} ended: {}", self.id, e),
            other => info!("{} ended: {:?}", self.id, other),
        }
        self.reporter.emit(ChatEvent::SessionEnded {
            session: self.id,
            peer: self.socket.peer().clone(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNetwork, Transport};
    use crate::types::ServiceId;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn linked_pair() -> (Arc<dyn Socket>, Arc<dyn Socket>) {
        let network = MemoryNetwork::new();
        let a = network.transport(PeerHandle::new("a", "A"));
        let b = network.transport(PeerHandle::new("b", "B"));
        let acceptor = b.listen(ServiceId::SERIAL_PORT).await.unwrap();
        let near = a
            .connect(&PeerHandle::new("b", "B"), ServiceId::SERIAL_PORT)
            .await
            .unwrap();
        let far = acceptor.accept().await.unwrap();
        (near, far)
    }

    #[tokio::test]
    async fn frames_are_reported_in_order_then_session_ends_once() {
        let (near, far) = linked_pair().await;
        let (reporter, mut events) = EventReporter::channel();
        let session = Session::new(
            SessionId(7),
            near,
            SessionOrigin::Outbound,
            &ChatConfig::default(),
            reporter,
        );
        session.start();
        session.start();

        let mut wire = Vec::new();
        for text in ["m1", "m2", "m3"] {
            wire.extend(encode_frame(text.as_bytes(), 1024).unwrap());
        }
        far.write(&wire).await.unwrap();
        far.close().await;

        for expected in 1..=3u64 {
            match events.recv().await.unwrap() {
                ChatEvent::MessageReceived { message, .. } => {
                    assert_eq!(message.order, expected);
                    assert_eq!(message.text(), format!("m{}", expected));
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            ChatEvent::SessionEnded {
                reason: EndReason::PeerClosed,
                ..
            }
        ));

        session.join().await;
        assert!(!session.is_open());
        assert_eq!(session.send(b"late").await, Err(ChatError::NotConnected));
        drop(session);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancel_unblocks_read_loop() {
        let (near, _far) = linked_pair().await;
        let (reporter, mut events) = EventReporter::channel();
        let session = Session::new(
            SessionId(1),
            near,
            SessionOrigin::Inbound,
            &ChatConfig::default(),
            reporter,
        );
        session.start();

        session.cancel().await;
        session.cancel().await;
        timeout(Duration::from_secs(1), session.join())
            .await
            .expect("read loop must stop after cancel");

        assert!(matches!(
            events.recv().await.unwrap(),
            ChatEvent::SessionEnded {
                reason: EndReason::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oversized_frame_ends_session_with_failure() {
        let (near, far) = linked_pair().await;
        let (reporter, mut events) = EventReporter::channel();
        let config = ChatConfig::default().with_max_frame_len(8);
        let session = Session::new(SessionId(2), near, SessionOrigin::Inbound, &config, reporter);
        session.start();

        far.write(&1000u32.to_be_bytes()).await.unwrap();

        match events.recv().await.unwrap() {
            ChatEvent::SessionEnded {
                reason: EndReason::Failed(ChatError::FrameTooLarge { size, max }),
                ..
            } => {
                assert_eq!((size, max), (1000, 8));
            }
            other => panic!("unexpected event {:?}", other),
        }
        session.join().await;
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn send_racing_cancel_reports_not_connected() {
        let (near, far) = linked_pair().await;
        let (reporter, _events) = EventReporter::channel();
        let session = Arc::new(Session::new(
            SessionId(4),
            near,
            SessionOrigin::Outbound,
            &ChatConfig::default(),
            reporter,
        ));

        // Fill the 16 KiB link exactly so the next write parks inside the socket.
        let filler = vec![0u8; 16 * 1024 - 4];
        session.send(&filler).await.unwrap();
        let blocked = {
            let session = session.clone();
            tokio::spawn(async move { session.send(b"stuck").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        session.cancel().await;
        let result = timeout(Duration::from_secs(1), blocked)
            .await
            .expect("cancel must unblock the write")
            .unwrap();
        assert_eq!(result, Err(ChatError::NotConnected));
        drop(far);
    }

    #[tokio::test]
    async fn send_writes_one_frame() {
        let (near, far) = linked_pair().await;
        let (reporter, _events) = EventReporter::channel();
        let session = Session::new(
            SessionId(3),
            near,
            SessionOrigin::Outbound,
            &ChatConfig::default(),
            reporter,
        );

        session.send(b"hi").await.unwrap();
        let mut buf = [0u8; 16];
        let n = far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0, 0, 0, 2, b'h', b'i']);
    }
}
