//! Platform backends
//!
//! BlueZ is the only supported stack. Other platforms get a backend that
//! reports the transport as unavailable.

use bluechat_core::PeerHandle;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux::BluezContext as Context;

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(not(target_os = "linux"))]
pub(crate) use fallback::UnsupportedContext as Context;

/// Snapshot of the local adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterStatus {
    pub name: String,
    pub address: String,
    pub powered: bool,
}

/// Sort peers for display: by name, then address
pub(crate) fn sort_peers(peers: &mut [PeerHandle]) {
    peers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.address.cmp(&b.address)));
}
