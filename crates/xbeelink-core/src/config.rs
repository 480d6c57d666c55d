//! Device configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::protocol::{ProtocolError, DEFAULT_BAUD_RATE, STANDARD_BAUD_RATES};

/// Serial device settings of one radio module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path, e.g. `/dev/ttyUSB0`
    pub path: String,

    /// Host side baud rate; the module is reconfigured to match it
    #[serde(default = "default_baud_rate", alias = "baudrate")]
    pub baud_rate: u32,

    /// Reopen the port after an unexpected disconnect
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_reconnect() -> bool {
    true
}

impl DeviceConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: default_baud_rate(),
            reconnect: default_reconnect(),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: DeviceConfig =
            serde_json::from_str(json).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.path.trim().is_empty() {
            return Err(ProtocolError::InvalidConfig(
                "device path must not be empty".to_string(),
            ));
        }
        if !STANDARD_BAUD_RATES.contains(&self.baud_rate) {
            return Err(ProtocolError::InvalidConfig(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        Ok(())
    }
}
