//! RFCOMM implementation of the core transport traits

use std::sync::Arc;

use async_trait::async_trait;
use bluechat_core::{
    ChatResult, ListenHandle, PeerDirectory, PeerHandle, ServiceId, Socket, Transport,
};
use tokio::sync::OnceCell;

use crate::config::RfcommConfig;
use crate::error::RfcommError;
use crate::platform::{AdapterStatus, Context};

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Bluetooth RFCOMM transport
///
/// The BlueZ session is opened lazily on first use, so constructing the
/// transport never touches the radio. A failed open is retried on the next
/// call.
pub struct RfcommTransport {
    config: RfcommConfig,
    context: OnceCell<Context>,
}

impl RfcommTransport {
    pub fn new(config: RfcommConfig) -> Result<Self, RfcommError> {
        config.validate()?;
        Ok(Self {
            config,
            context: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &RfcommConfig {
        &self.config
    }

    async fn context(&self) -> Result<&Context, RfcommError> {
        self.context
            .get_or_try_init(|| Context::open(&self.config))
            .await
    }

    /// Name, address and power state of the adapter in use
    pub async fn adapter_status(&self) -> ChatResult<AdapterStatus> {
        Ok(self.context().await?.status().await?)
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    fn name(&self) -> &'static str {
        "rfcomm"
    }

    async fn listen(&self, service: ServiceId) -> ChatResult<Arc<dyn ListenHandle>> {
        Ok(self.context().await?.listen(service).await?)
    }

    async fn connect(&self, peer: &PeerHandle, service: ServiceId) -> ChatResult<Arc<dyn Socket>> {
        Ok(self.context().await?.connect(peer, service).await?)
    }
}

#[async_trait]
impl PeerDirectory for RfcommTransport {
    async fn paired_peers(&self) -> ChatResult<Vec<PeerHandle>> {
        Ok(self.context().await?.paired_peers().await?)
    }
}
