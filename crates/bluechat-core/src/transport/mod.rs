//! Transport abstraction
//!
//! A transport provides blocking-style stream sockets: a listening endpoint
//! that accepts peers under a [`ServiceId`], outbound connects to a
//! [`PeerHandle`], and per-socket read/write/close. Closing a socket or a
//! listen handle is the only cancellation primitive, and it must wake any
//! task parked in `accept`, `read` or `write` on that resource.
//!
//! Implementations:
//!
//! - [`memory`] - in-process network for tests and simulation
//! - [`tcp`] - TCP stand-in for machines without a radio
//!
//! The BlueZ RFCOMM transport lives in the `bluechat-rfcomm` crate.

pub mod memory;
pub mod tcp;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::errors::{ChatError, ChatResult};
use crate::types::{PeerHandle, ServiceId};

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// An open bidirectional byte stream bound to one peer
///
/// `read` may run concurrently with `write`; concurrent writers must be
/// serialized by the caller.
#[async_trait]
pub trait Socket: Send + Sync {
    /// The remote endpoint
    fn peer(&self) -> &PeerHandle;

    /// Read at least one byte into `buf`
    ///
    /// Returns [`ChatError::Disconnected`] on peer close or local close.
    async fn read(&self, buf: &mut [u8]) -> ChatResult<usize>;

    /// Write the whole buffer
    async fn write(&self, data: &[u8]) -> ChatResult<()>;

    /// Close the socket; idempotent
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A bound service endpoint accepting inbound sockets
#[async_trait]
pub trait ListenHandle: Send + Sync {
    /// Wait for the next peer
    ///
    /// Returns [`ChatError::Cancelled`] once the handle is closed.
    async fn accept(&self) -> ChatResult<Arc<dyn Socket>>;

    /// Close the endpoint; idempotent
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Human-readable description of the bound endpoint
    fn local_endpoint(&self) -> String;
}

/// Factory for listen handles and outbound sockets
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Bind an acceptor under `service`
    async fn listen(&self, service: ServiceId) -> ChatResult<Arc<dyn ListenHandle>>;

    /// Connect to `peer` under `service`
    async fn connect(&self, peer: &PeerHandle, service: ServiceId) -> ChatResult<Arc<dyn Socket>>;
}

/// Source of the paired-device list offered to the user
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn paired_peers(&self) -> ChatResult<Vec<PeerHandle>>;
}

/// Directory backed by a fixed list, e.g. from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    peers: Vec<PeerHandle>,
}

impl StaticDirectory {
    pub fn new(peers: Vec<PeerHandle>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl PeerDirectory for StaticDirectory {
    async fn paired_peers(&self) -> ChatResult<Vec<PeerHandle>> {
        Ok(self.peers.clone())
    }
}

// ----------------------------------------------------------------------------
// Close Signal
// ----------------------------------------------------------------------------

/// One-way OPEN -> CLOSED latch that wakes every waiter
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Latch the signal; returns `true` only for the call that closed it
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is closed
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // The sender lives in `self`, so this only fails if `self` is gone.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Stream Socket
// ----------------------------------------------------------------------------

/// [`Socket`] over any pair of tokio read/write halves
///
/// Reads and writes race the close signal, so `close` from another task
/// unblocks them with [`ChatError::Disconnected`].
pub struct StreamSocket<R, W> {
    peer: PeerHandle,
    reader: Mutex<R>,
    writer: Mutex<Option<W>>,
    closed: CloseSignal,
}

impl<R, W> StreamSocket<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(peer: PeerHandle, reader: R, writer: W) -> Self {
        Self {
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            closed: CloseSignal::new(),
        }
    }
}

#[async_trait]
impl<R, W> Socket for StreamSocket<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    async fn read(&self, buf: &mut [u8]) -> ChatResult<usize> {
        if self.closed.is_closed() {
            return Err(ChatError::Disconnected);
        }

        tokio::select! {
            _ = self.closed.closed() => Err(ChatError::Disconnected),
            result = async {
                let mut reader = self.reader.lock().await;
                reader.read(&mut *buf).await
            } => match result {
                Ok(0) => Err(ChatError::Disconnected),
                Ok(n) => Ok(n),
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn write(&self, data: &[u8]) -> ChatResult<()> {
        if self.closed.is_closed() {
            return Err(ChatError::Disconnected);
        }

        tokio::select! {
            _ = self.closed.closed() => Err(ChatError::Disconnected),
            result = async {
                let mut guard = self.writer.lock().await;
                let writer = guard.as_mut().ok_or(ChatError::Disconnected)?;
                writer.write_all(data).await?;
                writer.flush().await?;
                Ok::<(), ChatError>(())
            } => result,
        }
    }

    async fn close(&self) {
        if !self.closed.close() {
            return;
        }

        // Any in-flight write has observed the signal and released the lock.
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of stream to {} failed: {}", self.peer, e);
            }
        }
        debug!("Closed stream to {}", self.peer);
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn pair() -> (
        StreamSocket<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        StreamSocket<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
    ) {
        let (a, b) = tokio::io::duplex(1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            StreamSocket::new(PeerHandle::anonymous("b"), ar, aw),
            StreamSocket::new(PeerHandle::anonymous("a"), br, bw),
        )
    }

    #[tokio::test]
    async fn close_signal_latches_once() {
        let signal = CloseSignal::new();
        assert!(!signal.is_closed());
        assert!(signal.close());
        assert!(!signal.close());
        timeout(Duration::from_millis(100), signal.closed())
            .await
            .expect("closed() must resolve after close()");
    }

    #[tokio::test]
    async fn local_close_unblocks_pending_read() {
        let (a, _b) = pair();
        let a = Arc::new(a);

        let reader = {
            let a = a.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                a.read(&mut buf).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.close().await;

        let result = timeout(Duration::from_secs(1), reader)
            .await
            .expect("read must be unblocked")
            .unwrap();
        assert_eq!(result, Err(ChatError::Disconnected));
    }

    #[tokio::test]
    async fn remote_close_reads_as_disconnect() {
        let (a, b) = pair();
        b.write(b"bye").await.unwrap();
        b.close().await;
        b.close().await;

        let mut buf = [0u8; 8];
        assert_eq!(a.read(&mut buf).await, Ok(3));
        assert_eq!(&buf[..3], b"bye");
        assert_eq!(a.read(&mut buf).await, Err(ChatError::Disconnected));
        assert_eq!(b.write(b"late").await, Err(ChatError::Disconnected));
    }
}
