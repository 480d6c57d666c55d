//! API frame commands
//!
//! Static descriptors for every API frame the driver sends or understands:
//! frame type byte, field schema and, for requests, the frame type of the
//! reply the module sends back.

use std::fmt;

use super::types::{self, Field, FieldType, TxOptions};
use super::ProtocolError;

/// Requests sent to the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Local AT command, applied immediately
    At,
    /// Local AT command, queued until `AC`/`WR`
    QueuedAt,
    /// AT command for another module in the network
    RemoteAt,
    /// Transmit request with default addressing
    Tx,
    /// Transmit request with explicit endpoints/cluster/profile
    TxExplicit,
    /// Install a source route for a remote node
    CreateSourceRoute,
    /// Register a joining device with its link key or install code
    RegisterJoiningDevice,
}

impl Command {
    /// All requests, for table checks
    pub const ALL: [Command; 7] = [
        Command::At,
        Command::QueuedAt,
        Command::RemoteAt,
        Command::Tx,
        Command::TxExplicit,
        Command::CreateSourceRoute,
        Command::RegisterJoiningDevice,
    ];

    /// API frame type byte
    pub fn frame_type(&self) -> u8 {
        match self {
            Command::At => 0x08,
            Command::QueuedAt => 0x09,
            Command::RemoteAt => 0x17,
            Command::Tx => 0x10,
            Command::TxExplicit => 0x11,
            Command::CreateSourceRoute => 0x21,
            Command::RegisterJoiningDevice => 0x24,
        }
    }

    /// Field schema, starting with the frame ID
    pub fn schema(&self) -> &'static [FieldType] {
        use FieldType::*;

        match self {
            Command::At | Command::QueuedAt => &[FrameId, AtCommand, Bytes],
            Command::RemoteAt => &[FrameId, Eui64, Nwk, U8, AtCommand, Bytes],
            // radius, options, data
            Command::Tx => &[FrameId, Eui64, Nwk, U8, U8, Bytes],
            // src ep, dst ep, cluster, profile, radius, options, data
            Command::TxExplicit => &[FrameId, Eui64, Nwk, U8, U8, U16, U16, U8, U8, Bytes],
            Command::CreateSourceRoute => &[FrameId, Eui64, Nwk, U8, Relays],
            // reserved, key options, key
            Command::RegisterJoiningDevice => &[FrameId, Eui64, U16, U8, Bytes],
        }
    }

    /// Response the module sends for this request, if any
    pub fn reply(&self) -> Option<Response> {
        match self {
            Command::At | Command::QueuedAt => Some(Response::AtResponse),
            Command::RemoteAt => Some(Response::RemoteAtResponse),
            Command::TxExplicit => Some(Response::TxStatus),
            Command::RegisterJoiningDevice => Some(Response::RegistrationStatus),
            Command::Tx | Command::CreateSourceRoute => None,
        }
    }

    /// Serialize `fields` per the schema and prepend the frame type
    pub fn encode(&self, fields: &[Field]) -> Result<Vec<u8>, ProtocolError> {
        let schema = self.schema();
        if fields.len() != schema.len() {
            return Err(ProtocolError::SchemaMismatch(format!(
                "{} takes {} fields, got {}",
                self,
                schema.len(),
                fields.len()
            )));
        }

        let mut payload = vec![self.frame_type()];
        for (field, expected) in fields.iter().zip(schema) {
            if field.field_type() != *expected {
                return Err(ProtocolError::SchemaMismatch(format!(
                    "{}: expected {:?}, got {:?}",
                    self,
                    expected,
                    field.field_type()
                )));
            }
            field.write_to(&mut payload)?;
        }
        Ok(payload)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::At => "at",
            Command::QueuedAt => "queued_at",
            Command::RemoteAt => "remote_at",
            Command::Tx => "tx",
            Command::TxExplicit => "tx_explicit",
            Command::CreateSourceRoute => "create_source_route",
            Command::RegisterJoiningDevice => "register_joining_device",
        };
        f.write_str(name)
    }
}

/// Frames received from the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Response {
    AtResponse,
    ModemStatus,
    TxStatus,
    RouteInformation,
    Rx,
    ExplicitRxIndicator,
    RxIoDataLongAddr,
    NodeIdIndicator,
    RemoteAtResponse,
    ExtendedStatus,
    RouteRecordIndicator,
    ManyToOneRri,
    RegistrationStatus,
}

impl Response {
    /// All responses, for table checks
    pub const ALL: [Response; 13] = [
        Response::AtResponse,
        Response::ModemStatus,
        Response::TxStatus,
        Response::RouteInformation,
        Response::Rx,
        Response::ExplicitRxIndicator,
        Response::RxIoDataLongAddr,
        Response::NodeIdIndicator,
        Response::RemoteAtResponse,
        Response::ExtendedStatus,
        Response::RouteRecordIndicator,
        Response::ManyToOneRri,
        Response::RegistrationStatus,
    ];

    /// API frame type byte
    pub fn frame_type(&self) -> u8 {
        match self {
            Response::AtResponse => 0x88,
            Response::ModemStatus => 0x8A,
            Response::TxStatus => 0x8B,
            Response::RouteInformation => 0x8D,
            Response::Rx => 0x90,
            Response::ExplicitRxIndicator => 0x91,
            Response::RxIoDataLongAddr => 0x92,
            Response::NodeIdIndicator => 0x95,
            Response::RemoteAtResponse => 0x97,
            Response::ExtendedStatus => 0x98,
            Response::RouteRecordIndicator => 0xA1,
            Response::ManyToOneRri => 0xA3,
            Response::RegistrationStatus => 0xA4,
        }
    }

    /// Look up a response by its frame type byte
    pub fn from_frame_type(frame_type: u8) -> Option<Response> {
        Response::ALL
            .iter()
            .copied()
            .find(|r| r.frame_type() == frame_type)
    }

    /// Field schema. Frames the driver does not interpret carry their whole
    /// body as raw bytes.
    pub fn schema(&self) -> &'static [FieldType] {
        use FieldType::*;

        match self {
            Response::AtResponse => &[FrameId, AtCommand, U8, Bytes],
            Response::ModemStatus => &[FieldType::ModemStatus],
            Response::TxStatus => &[
                FrameId,
                Nwk,
                U8,
                FieldType::TxStatus,
                FieldType::DiscoveryStatus,
            ],
            Response::ExplicitRxIndicator => &[Eui64, Nwk, U8, U8, U16, U16, U8, Bytes],
            Response::RemoteAtResponse => &[FrameId, Eui64, Nwk, AtCommand, U8, Bytes],
            Response::RouteRecordIndicator => &[Eui64, Nwk, U8, Relays],
            Response::ManyToOneRri => &[Eui64, Nwk, U8],
            Response::RegistrationStatus => &[FrameId, FieldType::RegistrationStatus],
            Response::RouteInformation
            | Response::Rx
            | Response::RxIoDataLongAddr
            | Response::NodeIdIndicator
            | Response::ExtendedStatus => &[Bytes],
        }
    }

    /// Deserialize a frame body (everything after the frame type byte)
    pub fn decode(&self, body: &[u8]) -> Result<Vec<Field>, ProtocolError> {
        let mut rest = body;
        let mut fields = Vec::with_capacity(self.schema().len());
        for field_type in self.schema() {
            let (field, remaining) = field_type.read(rest)?;
            fields.push(field);
            rest = remaining;
        }
        Ok(fields)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Response::AtResponse => "at_response",
            Response::ModemStatus => "modem_status",
            Response::TxStatus => "tx_status",
            Response::RouteInformation => "route_information",
            Response::Rx => "rx",
            Response::ExplicitRxIndicator => "explicit_rx_indicator",
            Response::RxIoDataLongAddr => "rx_io_data_long_addr",
            Response::NodeIdIndicator => "node_id_indicator",
            Response::RemoteAtResponse => "remote_at_response",
            Response::ExtendedStatus => "extended_status",
            Response::RouteRecordIndicator => "route_record_indicator",
            Response::ManyToOneRri => "many_to_one_rri",
            Response::RegistrationStatus => "registration_status",
        };
        f.write_str(name)
    }
}

/// Explicit addressing transmit parameters
#[derive(Debug, Clone)]
pub struct ExplicitTxParams {
    /// Destination IEEE address (`Eui64::UNKNOWN` if only the NWK is known)
    pub ieee: types::Eui64,
    /// Destination network address (`Nwk::UNKNOWN` if only the IEEE is known)
    pub nwk: types::Nwk,
    pub src_ep: u8,
    pub dst_ep: u8,
    pub cluster: u16,
    pub profile: u16,
    /// Maximum hops, 0 for the network maximum
    pub radius: u8,
    pub options: TxOptions,
    pub data: Vec<u8>,
}

impl ExplicitTxParams {
    /// Request fields after the frame ID
    pub fn into_fields(self) -> Vec<Field> {
        vec![
            Field::Eui64(self.ieee),
            Field::Nwk(self.nwk),
            Field::U8(self.src_ep),
            Field::U8(self.dst_ep),
            Field::U16(self.cluster),
            Field::U16(self.profile),
            Field::U8(self.radius),
            Field::U8(self.options.0),
            Field::Bytes(self.data),
        ]
    }
}

/// Plain-text command sent while the module is in command mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandModeCommand {
    /// The text, e.g. `ATAP2`
    pub command: String,
    /// Whether a carriage return terminates the command (not for `+++`)
    pub terminated: bool,
}

impl CommandModeCommand {
    /// A carriage-return terminated AT command
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            terminated: true,
        }
    }

    /// The escape sequence that switches the module into command mode
    pub fn escape_sequence() -> Self {
        Self {
            command: "+++".to_string(),
            terminated: false,
        }
    }

    /// Bytes as written to the transport
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.command.as_bytes().to_vec();
        if self.terminated {
            bytes.push(b'\r');
        }
        bytes
    }
}
