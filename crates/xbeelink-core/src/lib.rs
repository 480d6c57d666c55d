//! # xbeelink Core Library
//!
//! Host side driver for Digi XBee Zigbee modules attached over a serial port.
//!
//! This library provides:
//! - Escaped API frame encoding, decoding and resynchronization
//! - Request/response correlation by frame ID with bounded waits
//! - Unsolicited event dispatch (modem status, received data) to a listener
//! - Switching a module into API mode through text command mode
//! - Reconnection after the serial link drops
//!
//! ## Example
//!
//! ```rust,ignore
//! use xbeelink_core::prelude::*;
//!
//! let xbee = XBee::new(DeviceConfig::new("/dev/ttyUSB0"));
//! xbee.connect().await?;
//! xbee.ensure_api_mode().await?;
//!
//! let association = xbee.at_command("AI", None).await?;
//! println!("AI: {:?}", association);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::DeviceConfig;
    pub use crate::protocol::{
        AtValue, Command, Eui64, ExplicitRx, ExplicitTxParams, ModemStatus, NetworkListener, Nwk,
        ProtocolError, RemoteAtOptions, TxOptions, TxStatus, XBee,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
