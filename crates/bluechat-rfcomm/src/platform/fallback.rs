//! Backend for platforms without BlueZ

use std::sync::Arc;

use bluechat_core::{ListenHandle, PeerHandle, ServiceId, Socket};
use tracing::warn;

use super::AdapterStatus;
use crate::config::RfcommConfig;
use crate::error::RfcommError;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

pub(crate) struct UnsupportedContext;

impl UnsupportedContext {
    pub(crate) async fn open(_config: &RfcommConfig) -> Result<Self, RfcommError> {
        warn!("RFCOMM is only available with BlueZ on Linux; use the TCP transport instead");
        Err(RfcommError::Unsupported)
    }

    pub(crate) async fn listen(
        &self,
        _service: ServiceId,
    ) -> Result<Arc<dyn ListenHandle>, RfcommError> {
        Err(RfcommError::Unsupported)
    }

    pub(crate) async fn connect(
        &self,
        _peer: &PeerHandle,
        _service: ServiceId,
    ) -> Result<Arc<dyn Socket>, RfcommError> {
        Err(RfcommError::Unsupported)
    }

    pub(crate) async fn paired_peers(&self) -> Result<Vec<PeerHandle>, RfcommError> {
        Err(RfcommError::Unsupported)
    }

    pub(crate) async fn status(&self) -> Result<AdapterStatus, RfcommError> {
        Err(RfcommError::Unsupported)
    }
}
