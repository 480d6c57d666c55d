//! Protocol errors

use thiserror::Error;

use super::types::{RegistrationStatus, TxStatus};

/// Errors that can occur while talking to the radio module
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("No response to {0} command")]
    Timeout(String),

    #[error("API is not running")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Reply for frame {0} was dropped before it resolved")]
    ReplyDropped(u8),

    #[error("Unexpected reply type for {0}")]
    UnexpectedReply(String),

    #[error("baudrate must be one of the standard serial rates, got {0}")]
    InvalidBaudRate(u32),

    #[error("Invalid device configuration: {0}")]
    InvalidConfig(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Field schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Unknown AT command: {0}")]
    UnknownAtCommand(String),

    #[error("Value {value} does not fit AT command {command}")]
    ValueOutOfRange { command: String, value: u64 },

    #[error("AT Command response for {command}: ERROR")]
    AtCommandFailed { command: String },

    #[error("AT Command response for {command}: INVALID_COMMAND")]
    InvalidCommand { command: String },

    #[error("AT Command response for {command}: INVALID_PARAMETER")]
    InvalidParameter { command: String },

    #[error("AT Command response for {command}: TX_FAILURE")]
    TransmissionFailure { command: String },

    #[error("AT Command response for {command}: unexpected status {status:#04x}")]
    UnexpectedAtStatus { command: String, status: u8 },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(TxStatus),

    #[error("Registration Status: {0}")]
    RegistrationFailed(RegistrationStatus),

    #[error("Failed to configure XBee for API mode")]
    ApiModeUnavailable,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::SerialError(e.to_string())
    }
}

impl ProtocolError {
    /// True for errors raised because the module reported a non-zero AT status
    pub fn is_at_status(&self) -> bool {
        matches!(
            self,
            ProtocolError::AtCommandFailed { .. }
                | ProtocolError::InvalidCommand { .. }
                | ProtocolError::InvalidParameter { .. }
                | ProtocolError::TransmissionFailure { .. }
                | ProtocolError::UnexpectedAtStatus { .. }
        )
    }
}
