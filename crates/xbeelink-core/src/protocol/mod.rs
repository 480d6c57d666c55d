//! XBee API protocol
//!
//! Escaped API frames (`AP=2`) over a serial link, request/response
//! correlation by frame ID, and the text command mode used to switch a module
//! into API mode.

pub mod api;
pub mod at_commands;
pub mod codec;
mod command_mode;
pub mod commands;
mod error;
pub mod gateway;
pub mod serial;
pub mod state;
pub mod stream;
pub mod types;

use std::time::Duration;

pub use api::{ExplicitRx, NetworkListener, Opener, PendingReply, Reply, XBee};
pub use at_commands::{at_command_type, AtValue, AtValueType};
pub use command_mode::{CommandModeResponse, TransitionState};
pub use commands::{Command, CommandModeCommand, ExplicitTxParams, Response};
pub use error::ProtocolError;
pub use gateway::{FrameBuffer, Gateway, Inbound};
pub use serial::{configure_port, list_ports, open_port, PortInfo};
pub use state::{ConnectionState, Latch};
pub use stream::{EventSink, SerialTransport, Transport, TransportEvent};
pub use types::{
    AtCommandStatus, DiscoveryStatus, Eui64, Field, FieldType, FrameId, ModemStatus, Nwk,
    RegistrationStatus, RemoteAtOptions, TxOptions, TxStatus,
};

/// Factory setting of the module UART
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Rates a serial port can be switched to
pub const STANDARD_BAUD_RATES: [u32; 30] = [
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000,
    2500000, 3000000, 3500000, 4000000,
];

/// Local AT command reply timeout
pub const AT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Remote AT command reply timeout; the reply crosses the mesh twice
pub const REMOTE_AT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery report timeout of a transmit request
pub const TX_STATUS_TIMEOUT: Duration = Duration::from_secs(120);

/// Overall bound of [`XBee::probe`]
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(45);

/// Text reply timeout in command mode
pub const COMMAND_MODE_TIMEOUT: Duration = Duration::from_secs(2);

/// Silence the module needs before it recognizes `+++`
pub const COMMAND_MODE_GUARD_TIME: Duration = Duration::from_millis(1200);

/// Bound of one reconnect attempt
pub const RECONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff before reconnect attempt `attempt + 1`
pub fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_caps() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(4), Duration::from_secs(16));
        assert_eq!(reconnect_delay(5), Duration::from_secs(32));
        assert_eq!(reconnect_delay(40), Duration::from_secs(32));
    }

    #[test]
    fn test_candidate_rates_are_standard() {
        for rate in at_commands::candidate_baud_rates() {
            assert!(STANDARD_BAUD_RATES.contains(&rate), "{}", rate);
        }
        assert!(STANDARD_BAUD_RATES.contains(&DEFAULT_BAUD_RATE));
    }
}
