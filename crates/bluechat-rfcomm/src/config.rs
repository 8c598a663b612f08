//! RFCOMM transport configuration

use serde::{Deserialize, Serialize};

use crate::error::RfcommError;

/// Highest channel number RFCOMM can address
pub const MAX_RFCOMM_CHANNEL: u16 = 30;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the RFCOMM transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfcommConfig {
    /// Adapter name such as `hci0`; the default adapter when unset
    pub adapter: Option<String>,
    /// Server channel; BlueZ assigns one when unset
    pub channel: Option<u16>,
    /// Name published in the service record
    pub service_name: String,
    /// Require a paired, authenticated link
    pub require_authentication: bool,
    /// Power the adapter on instead of failing when it is off
    pub auto_power_on: bool,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            channel: None,
            service_name: "BlueChat".to_string(),
            require_authentication: true,
            auto_power_on: false,
        }
    }
}

impl RfcommConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific adapter
    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    /// Pin the server channel
    pub fn with_channel(mut self, channel: u16) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Set the published service name
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Enable or disable link authentication
    pub fn with_authentication(mut self, required: bool) -> Self {
        self.require_authentication = required;
        self
    }

    /// Enable or disable powering the adapter on demand
    pub fn with_auto_power_on(mut self, enabled: bool) -> Self {
        self.auto_power_on = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), RfcommError> {
        if let Some(channel) = self.channel {
            if channel == 0 || channel > MAX_RFCOMM_CHANNEL {
                return Err(RfcommError::InvalidConfiguration(format!(
                    "channel {} outside 1..={}",
                    channel, MAX_RFCOMM_CHANNEL
                )));
            }
        }
        if matches!(&self.adapter, Some(name) if name.trim().is_empty()) {
            return Err(RfcommError::InvalidConfiguration(
                "adapter name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RfcommConfig::default();
        assert_eq!(config.adapter, None);
        assert!(config.require_authentication);
        assert!(!config.auto_power_on);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn channel_range_is_checked() {
        assert!(RfcommConfig::new().with_channel(0).validate().is_err());
        assert!(RfcommConfig::new().with_channel(31).validate().is_err());
        assert!(RfcommConfig::new().with_channel(3).validate().is_ok());
        assert!(RfcommConfig::new().with_adapter(" ").validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: RfcommConfig = toml::from_str("adapter = \"hci1\"\nchannel = 4\n").unwrap();
        assert_eq!(config.adapter.as_deref(), Some("hci1"));
        assert_eq!(config.channel, Some(4));
        assert_eq!(config.service_name, "BlueChat");
    }
}
