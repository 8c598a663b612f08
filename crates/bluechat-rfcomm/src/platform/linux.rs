//! BlueZ backend using bluer
//!
//! Both directions go through BlueZ profiles: listening registers a server
//! profile for the service UUID, connecting registers a client profile and
//! asks BlueZ to connect that profile on the remote device. Either way the
//! socket arrives as a connection request on the profile handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluechat_core::{
    ChatError, ChatResult, CloseSignal, ListenHandle, PeerHandle, ServiceId, Socket, StreamSocket,
};
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{sort_peers, AdapterStatus};
use crate::config::RfcommConfig;
use crate::error::RfcommError;

/// Time BlueZ has to hand over the socket once the profile is connected
const PROFILE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type RfcommSocket = StreamSocket<ReadHalf<Stream>, WriteHalf<Stream>>;

// ----------------------------------------------------------------------------
// BlueZ Context
// ----------------------------------------------------------------------------

pub(crate) struct BluezContext {
    session: Session,
    adapter: Adapter,
    config: RfcommConfig,
}

impl BluezContext {
    pub(crate) async fn open(config: &RfcommConfig) -> Result<Self, RfcommError> {
        let session = Session::new()
            .await
            .map_err(|e| RfcommError::Session(e.to_string()))?;

        let adapter = match &config.adapter {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))?;

        info!("Using Bluetooth adapter {}", adapter.name());
        Ok(Self {
            session,
            adapter,
            config: config.clone(),
        })
    }

    /// Fail with `PoweredOff` unless the radio is on or may be switched on
    async fn ensure_powered(&self) -> Result<(), RfcommError> {
        if self.adapter.is_powered().await.unwrap_or(false) {
            return Ok(());
        }
        if !self.config.auto_power_on {
            return Err(RfcommError::PoweredOff(self.adapter.name().to_string()));
        }

        self.adapter
            .set_powered(true)
            .await
            .map_err(|e| RfcommError::AdapterNotAvailable(format!("power on failed: {}", e)))?;
        info!("Powered on adapter {}", self.adapter.name());
        Ok(())
    }

    fn profile(&self, service: ServiceId, role: Role) -> Profile {
        let channel = match role {
            Role::Server => self.config.channel,
            _ => None,
        };
        Profile {
            uuid: service.uuid(),
            name: Some(self.config.service_name.clone()),
            role: Some(role),
            channel,
            require_authentication: Some(self.config.require_authentication),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        }
    }

    pub(crate) async fn listen(
        &self,
        service: ServiceId,
    ) -> Result<Arc<dyn ListenHandle>, RfcommError> {
        self.ensure_powered().await?;

        let handle = self
            .session
            .register_profile(self.profile(service, Role::Server))
            .await
            .map_err(|e| RfcommError::ProfileRegistration(e.to_string()))?;

        let endpoint = match self.config.channel {
            Some(channel) => format!("rfcomm://{}/{} (channel {})", self.adapter.name(), service, channel),
            None => format!("rfcomm://{}/{}", self.adapter.name(), service),
        };
        info!("RFCOMM server profile registered: {}", endpoint);

        Ok(Arc::new(RfcommListenHandle {
            adapter: self.adapter.clone(),
            profile: Mutex::new(Some(handle)),
            endpoint,
            closed: CloseSignal::new(),
        }))
    }

    pub(crate) async fn connect(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
    ) -> Result<Arc<dyn Socket>, RfcommError> {
        self.ensure_powered().await?;

        let address: Address = peer
            .address
            .parse()
            .map_err(|_| RfcommError::InvalidAddress(peer.address.clone()))?;
        let failed = |reason: String| RfcommError::ConnectFailed {
            address: peer.address.clone(),
            reason,
        };

        let device = self
            .adapter
            .device(address)
            .map_err(|e| failed(e.to_string()))?;
        let mut handle = self
            .session
            .register_profile(self.profile(service, Role::Client))
            .await
            .map_err(|e| RfcommError::ProfileRegistration(e.to_string()))?;

        debug!("Connecting profile {} on {}", service, peer);
        let uuid = service.uuid();
        let connect = device.connect_profile(&uuid);
        tokio::pin!(connect);

        let request = tokio::select! {
            request = handle.next() => request,
            result = &mut connect => {
                result.map_err(|e| failed(e.to_string()))?;
                timeout(PROFILE_REQUEST_TIMEOUT, handle.next())
                    .await
                    .map_err(|_| failed("no connection request from BlueZ".to_string()))?
            }
        };

        let request = request.ok_or(RfcommError::RequestStreamEnded)?;
        let stream = request.accept().map_err(|e| failed(e.to_string()))?;
        info!("RFCOMM link to {} established", peer);

        let (reader, writer) = tokio::io::split(stream);
        Ok(Arc::new(RfcommSocket::new(peer.clone(), reader, writer)))
    }

    pub(crate) async fn paired_peers(&self) -> Result<Vec<PeerHandle>, RfcommError> {
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))?;

        let mut peers = Vec::new();
        for address in addresses {
            let Ok(device) = self.adapter.device(address) else {
                continue;
            };
            if !device.is_paired().await.unwrap_or(false) {
                continue;
            }
            peers.push(peer_handle(&self.adapter, address).await);
        }

        sort_peers(&mut peers);
        Ok(peers)
    }

    pub(crate) async fn status(&self) -> Result<AdapterStatus, RfcommError> {
        let address = self
            .adapter
            .address()
            .await
            .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))?;
        Ok(AdapterStatus {
            name: self.adapter.name().to_string(),
            address: address.to_string(),
            powered: self.adapter.is_powered().await.unwrap_or(false),
        })
    }
}

/// Display handle for a device, falling back to the address as name
async fn peer_handle(adapter: &Adapter, address: Address) -> PeerHandle {
    let alias = match adapter.device(address) {
        Ok(device) => device.alias().await.ok(),
        Err(_) => None,
    };
    match alias {
        Some(name) if !name.is_empty() => PeerHandle::new(address.to_string(), name),
        _ => PeerHandle::anonymous(address.to_string()),
    }
}

// ----------------------------------------------------------------------------
// Listen Handle
// ----------------------------------------------------------------------------

struct RfcommListenHandle {
    adapter: Adapter,
    profile: Mutex<Option<ProfileHandle>>,
    endpoint: String,
    closed: CloseSignal,
}

impl RfcommListenHandle {
    async fn unregister(&self) {
        if self.profile.lock().await.take().is_some() {
            debug!("RFCOMM server profile unregistered: {}", self.endpoint);
        }
    }
}

#[async_trait]
impl ListenHandle for RfcommListenHandle {
    async fn accept(&self) -> ChatResult<Arc<dyn Socket>> {
        loop {
            if self.closed.is_closed() {
                self.unregister().await;
                return Err(ChatError::Cancelled);
            }

            let request = tokio::select! {
                _ = self.closed.closed() => continue,
                request = async {
                    match self.profile.lock().await.as_mut() {
                        Some(handle) => handle.next().await,
                        None => None,
                    }
                } => request,
            };

            let Some(request) = request else {
                if self.closed.is_closed() {
                    continue;
                }
                return Err(RfcommError::RequestStreamEnded.into());
            };

            let address = request.device();
            match request.accept() {
                Ok(stream) => {
                    let peer = peer_handle(&self.adapter, address).await;
                    info!("Accepted RFCOMM connection from {}", peer);
                    let (reader, writer) = tokio::io::split(stream);
                    return Ok(Arc::new(RfcommSocket::new(peer, reader, writer)));
                }
                Err(e) => {
                    let err = RfcommError::AcceptFailed {
                        address: address.to_string(),
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                }
            }
        }
    }

    fn close(&self) {
        if self.closed.close() {
            // A pending accept holds the lock and unregisters on wake-up.
            if let Ok(mut profile) = self.profile.try_lock() {
                profile.take();
            }
            debug!("RFCOMM listener {} closed", self.endpoint);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    fn local_endpoint(&self) -> String {
        self.endpoint.clone()
    }
}
