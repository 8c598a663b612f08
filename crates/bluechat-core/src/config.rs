//! Connection core configuration

use serde::{Deserialize, Serialize};

use crate::errors::{ChatError, ChatResult};
use crate::framing::DEFAULT_MAX_FRAME_LEN;
use crate::types::ServiceId;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration shared by the connection manager and its roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Service identifier advertised by the listener and requested by initiators
    pub service_id: ServiceId,
    /// Largest accepted frame payload in bytes
    pub max_frame_len: usize,
    /// Size of the per-session read buffer
    pub read_buffer_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            service_id: ServiceId::SERIAL_PORT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_buffer_size: 1024,
        }
    }
}

impl ChatConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service identifier
    pub fn with_service_id(mut self, service_id: ServiceId) -> Self {
        self.service_id = service_id;
        self
    }

    /// Set the maximum frame payload size
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Set the read buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Check the configuration for values the roles cannot work with
    pub fn validate(&self) -> ChatResult<()> {
        if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
            return Err(ChatError::InvalidConfiguration {
                reason: format!("max_frame_len {} out of range", self.max_frame_len),
            });
        }
        if self.read_buffer_size == 0 {
            return Err(ChatError::InvalidConfiguration {
                reason: "read_buffer_size must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
