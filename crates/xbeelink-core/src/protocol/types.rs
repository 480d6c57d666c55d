//! Wire types
//!
//! Addresses, status codes and the field primitives API frames are built from.
//! Status enums always decode: values this driver does not know about are kept
//! in an `Unknown(raw)` variant so the raw byte survives for diagnostics.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

use super::ProtocolError;

/// API frame ID. `0` means "no reply expected"
pub type FrameId = u8;

/// 64-bit IEEE address.
///
/// Stored in logical (little-endian) order; the module sends and expects the
/// most significant byte first, so the bytes are reversed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    /// Address used when the IEEE address of the destination is not known
    pub const UNKNOWN: Eui64 = Eui64([0xFF; 8]);

    /// Build from a numeric address (`0x0013A200_40A1B2C3` style)
    pub fn from_u64(value: u64) -> Self {
        Eui64(value.to_le_bytes())
    }

    /// Numeric value of the address
    pub fn as_u64(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    /// Bytes as they appear on the wire
    pub fn to_wire(&self) -> [u8; 8] {
        let mut wire = self.0;
        wire.reverse();
        wire
    }

    /// Parse the on-wire representation
    pub fn from_wire(wire: [u8; 8]) -> Self {
        let mut logical = wire;
        logical.reverse();
        Eui64(logical)
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().rev().map(|b| format!("{:02x}", b)).collect();
        write!(f, "{}", parts.join(":"))
    }
}

/// 16-bit network address, big-endian on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Nwk(pub u16);

impl Nwk {
    /// Address used when the network address of the destination is not known
    pub const UNKNOWN: Nwk = Nwk(0xFFFE);
    /// Broadcast to all devices
    pub const BROADCAST_ALL: Nwk = Nwk(0xFFFF);
    /// Broadcast to devices with receiver on when idle
    pub const BROADCAST_RX_ON_WHEN_IDLE: Nwk = Nwk(0xFFFD);
    /// Broadcast to routers and coordinator
    pub const BROADCAST_ROUTERS: Nwk = Nwk(0xFFFC);
}

impl fmt::Display for Nwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Status enum over a single byte with an `Unknown(raw)` fallback
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Value not known to this driver
            Unknown(u8),
        }

        impl From<u8> for $name {
            fn from(value: u8) -> Self {
                match value {
                    $($value => $name::$variant,)+
                    other => $name::Unknown(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                match value {
                    $($name::$variant => $value,)+
                    $name::Unknown(raw) => raw,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => f.write_str(stringify!($variant)),)+
                    $name::Unknown(raw) => write!(f, "Unknown({:#04x})", raw),
                }
            }
        }
    };
}

wire_enum! {
    /// Unsolicited module/network lifecycle notification
    ModemStatus {
        HardwareReset = 0x00,
        WatchdogTimerReset = 0x01,
        JoinedNetwork = 0x02,
        Disassociated = 0x03,
        ConfigurationErrorSynchronizationLost = 0x04,
        CoordinatorRealignment = 0x05,
        CoordinatorStarted = 0x06,
        NetworkSecurityKeyUpdated = 0x07,
        NetworkWokeUp = 0x0B,
        NetworkWentToSleep = 0x0C,
        VoltageSupplyLimitExceeded = 0x0D,
        DeviceCloudConnected = 0x0E,
        DeviceCloudDisconnected = 0x0F,
        ModemKeyEstablished = 0x10,
        ModemConfigurationChangedWhileJoinInProgress = 0x11,
        AccessFault = 0x12,
        FatalStackError = 0x13,
        PlkeTableInitiated = 0x14,
        PlkeTableSuccess = 0x15,
        PlkeTableIsFull = 0x16,
        PlkeNotAuthorized = 0x17,
        PlkeInvalidTrustCenterRequest = 0x18,
        PlkeTrustCenterUpdateFail = 0x19,
        PlkeBadEuiAddress = 0x1A,
        PlkeLinkKeyRejected = 0x1B,
        PlkeUpdateOccured = 0x1C,
        PlkeLinkKeyTableClear = 0x1D,
        ZigbeeFrequencyAgilityHasRequestedChannelChange = 0x1E,
        ZigbeeExecuteAtfrNoJoinableBeaconResponses = 0x1F,
        ZigbeeTokensSpaceRecovered = 0x20,
        ZigbeeTokensSpaceUnrecoverable = 0x21,
        ZigbeeTokensSpaceCorrupted = 0x22,
        ZigbeeDualModeMetaframeError = 0x30,
        BleConnect = 0x32,
        BleDisconnect = 0x33,
        NoSecureSessionConnection = 0x34,
        CellComponentUpdateStarted = 0x35,
        CellComponentUpdateFailed = 0x36,
        CellComponentUpdateSucceded = 0x37,
        XbeeFirmwareUpdateStarted = 0x38,
        XbeeFirmwareUpdateFailed = 0x39,
        XbeeWillResetToApplyFirmwareUpdate = 0x3A,
        SecureSessionSuccessfullyEstablished = 0x3B,
        SecureSessionEnded = 0x3C,
        SecureSessionAuthenticationFailed = 0x3D,
        PanIdConflictDetected = 0x3E,
        PanIdUpdatedDueToConflict = 0x3F,
        RouterPanIdChangedByCoordinatorDueToConflict = 0x40,
        NetworkWatchdogTimeoutExpiredThreeTimes = 0x42,
        JoinWindowOpened = 0x43,
        JoinWindowClosed = 0x44,
        NetworkSecurityKeyRotationInitiated = 0x45,
        StackReset = 0x80,
        FibBootloaderReset = 0x81,
        SendOrJoinCommandIssuedWithoutConnectingFromAp = 0x82,
        AccessPointNotFound = 0x83,
        PskNotConfigured = 0x84,
        SsidNotFound = 0x87,
        FailedToJoinWithSecurityEnabled = 0x88,
        CoreLockupOrCrystalFailureReset = 0x89,
        InvalidChannel = 0x8A,
        LowVoltageReset = 0x8B,
        FailedToJoinAccessPoint = 0x8E,
    }
}

wire_enum! {
    /// Delivery outcome of a transmit request
    TxStatus {
        Success = 0x00,
        /// All retries expired without an ACK. Not returned for broadcasts
        NoAckReceived = 0x01,
        CcaFailure = 0x02,
        /// Coordinator timed out waiting for a poll from a sleeping end device
        IndirectTxTimeout = 0x03,
        InvalidDestinationEndpoint = 0x15,
        NetworkAckFailure = 0x21,
        /// End device was not joined to the network
        IndirectTxFailure = 0x22,
        SelfAddressed = 0x23,
        AddressNotFound = 0x24,
        RouteNotFound = 0x25,
        /// Broadcast source failed to hear a neighbor relay the message
        BroadcastRelayFailure = 0x26,
        InvalidBindingIdx = 0x2B,
        NoResources = 0x2C,
        BroadcastApsTxAttempt = 0x2D,
        /// Unicast with APS transmission attempted while `EE=0`
        UnicastApsTxAttempt = 0x2E,
        InternalError = 0x31,
        NoResources2 = 0x32,
        PayloadTooLarge = 0x74,
    }
}

impl TxStatus {
    /// Statuses that count as a completed transmission
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TxStatus::Success | TxStatus::SelfAddressed | TxStatus::BroadcastApsTxAttempt
        )
    }
}

wire_enum! {
    /// Route/address discovery overhead reported with a TX status
    DiscoveryStatus {
        Success = 0x00,
        AddressDiscovery = 0x01,
        RouteDiscovery = 0x02,
        AddressAndRoute = 0x03,
        ExtendedTimeout = 0x40,
    }
}

wire_enum! {
    /// Outcome of a joining-device key registration
    RegistrationStatus {
        Success = 0x00,
        KeyTooLong = 0x01,
        TransientKeyTableIsFull = 0x18,
        AddressNotFoundInTheKeyTable = 0xB1,
        KeyIsInvalidOrReserved = 0xB2,
        InvalidAddress = 0xB3,
        KeyTableIsFull = 0xB4,
        SecurityDataIsInvalidInstallCodeCrcFails = 0xBD,
    }
}

wire_enum! {
    /// Status byte of a local or remote AT command response
    AtCommandStatus {
        Ok = 0x00,
        Error = 0x01,
        InvalidCommand = 0x02,
        InvalidParameter = 0x03,
        TxFailure = 0x04,
    }
}

/// Transmit options of an explicit addressing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions(pub u8);

impl TxOptions {
    pub const NONE: TxOptions = TxOptions(0x00);
    pub const DISABLE_RETRIES_AND_ROUTE_REPAIR: TxOptions = TxOptions(0x01);
    pub const MULTICAST: TxOptions = TxOptions(0x08);
    pub const ENABLE_APS_ENCRYPTION: TxOptions = TxOptions(0x20);
    pub const USE_EXTENDED_TX_TIMEOUT: TxOptions = TxOptions(0x40);

    pub fn contains(&self, other: TxOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TxOptions {
    type Output = TxOptions;

    fn bitor(self, rhs: TxOptions) -> TxOptions {
        TxOptions(self.0 | rhs.0)
    }
}

/// Options byte of a remote AT command request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteAtOptions(pub u8);

impl RemoteAtOptions {
    pub const NONE: RemoteAtOptions = RemoteAtOptions(0x00);
    /// Apply the change on the remote module immediately
    pub const APPLY_CHANGES: RemoteAtOptions = RemoteAtOptions(0x02);
    /// Send the command with APS encryption
    pub const ENCRYPTION: RemoteAtOptions = RemoteAtOptions(0x10);

    /// Options used by the network layer: apply and/or encrypt
    pub fn new(apply_changes: bool, encryption: bool) -> Self {
        let mut bits = 0;
        if apply_changes {
            bits |= Self::APPLY_CHANGES.0;
        }
        if encryption {
            bits |= Self::ENCRYPTION.0;
        }
        RemoteAtOptions(bits)
    }
}

/// Serialization type of one field in a frame schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    FrameId,
    /// Two ASCII characters
    AtCommand,
    Eui64,
    Nwk,
    U8,
    /// Big-endian u16
    U16,
    /// Raw bytes, consumes the rest of the frame
    Bytes,
    /// u8 count followed by that many NWK addresses
    Relays,
    ModemStatus,
    TxStatus,
    DiscoveryStatus,
    RegistrationStatus,
}

/// A decoded or to-be-encoded frame field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    FrameId(FrameId),
    AtCommand([u8; 2]),
    Eui64(Eui64),
    Nwk(Nwk),
    U8(u8),
    U16(u16),
    Bytes(Vec<u8>),
    Relays(Vec<Nwk>),
    ModemStatus(ModemStatus),
    TxStatus(TxStatus),
    DiscoveryStatus(DiscoveryStatus),
    RegistrationStatus(RegistrationStatus),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::FrameId(_) => FieldType::FrameId,
            Field::AtCommand(_) => FieldType::AtCommand,
            Field::Eui64(_) => FieldType::Eui64,
            Field::Nwk(_) => FieldType::Nwk,
            Field::U8(_) => FieldType::U8,
            Field::U16(_) => FieldType::U16,
            Field::Bytes(_) => FieldType::Bytes,
            Field::Relays(_) => FieldType::Relays,
            Field::ModemStatus(_) => FieldType::ModemStatus,
            Field::TxStatus(_) => FieldType::TxStatus,
            Field::DiscoveryStatus(_) => FieldType::DiscoveryStatus,
            Field::RegistrationStatus(_) => FieldType::RegistrationStatus,
        }
    }

    /// Append the wire form of this field
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        match self {
            Field::FrameId(v) | Field::U8(v) => out.push(*v),
            Field::AtCommand(cmd) => out.extend_from_slice(cmd),
            Field::Eui64(ieee) => out.extend_from_slice(&ieee.to_wire()),
            Field::Nwk(nwk) => write_u16(out, nwk.0),
            Field::U16(v) => write_u16(out, *v),
            Field::Bytes(bytes) => out.extend_from_slice(bytes),
            Field::Relays(relays) => {
                let count = u8::try_from(relays.len()).map_err(|_| {
                    ProtocolError::SchemaMismatch(format!("{} relays do not fit", relays.len()))
                })?;
                out.push(count);
                for relay in relays {
                    write_u16(out, relay.0);
                }
            }
            Field::ModemStatus(s) => out.push((*s).into()),
            Field::TxStatus(s) => out.push((*s).into()),
            Field::DiscoveryStatus(s) => out.push((*s).into()),
            Field::RegistrationStatus(s) => out.push((*s).into()),
        }
        Ok(())
    }
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    let mut bytes = [0u8; 2];
    BigEndian::write_u16(&mut bytes, value);
    out.extend_from_slice(&bytes);
}

fn take<'a>(data: &'a [u8], n: usize, what: FieldType) -> Result<(&'a [u8], &'a [u8]), ProtocolError> {
    if data.len() < n {
        return Err(ProtocolError::MalformedFrame(format!(
            "{:?} needs {} bytes, {} left",
            what,
            n,
            data.len()
        )));
    }
    Ok(data.split_at(n))
}

impl FieldType {
    /// Decode one field from the front of `data`, returning the remainder
    pub fn read<'a>(&self, data: &'a [u8]) -> Result<(Field, &'a [u8]), ProtocolError> {
        let field_type = *self;
        match field_type {
            FieldType::Bytes => Ok((Field::Bytes(data.to_vec()), &data[data.len()..])),
            FieldType::AtCommand => {
                let (head, rest) = take(data, 2, field_type)?;
                Ok((Field::AtCommand([head[0], head[1]]), rest))
            }
            FieldType::Eui64 => {
                let (head, rest) = take(data, 8, field_type)?;
                let mut wire = [0u8; 8];
                wire.copy_from_slice(head);
                Ok((Field::Eui64(Eui64::from_wire(wire)), rest))
            }
            FieldType::Nwk | FieldType::U16 => {
                let (head, rest) = take(data, 2, field_type)?;
                let value = BigEndian::read_u16(head);
                let field = if field_type == FieldType::Nwk {
                    Field::Nwk(Nwk(value))
                } else {
                    Field::U16(value)
                };
                Ok((field, rest))
            }
            FieldType::Relays => {
                let (count, rest) = take(data, 1, field_type)?;
                let (body, rest) = take(rest, count[0] as usize * 2, field_type)?;
                let relays = body
                    .chunks_exact(2)
                    .map(|c| Nwk(BigEndian::read_u16(c)))
                    .collect();
                Ok((Field::Relays(relays), rest))
            }
            FieldType::FrameId
            | FieldType::U8
            | FieldType::ModemStatus
            | FieldType::TxStatus
            | FieldType::DiscoveryStatus
            | FieldType::RegistrationStatus => {
                let (head, rest) = take(data, 1, field_type)?;
                let b = head[0];
                let field = match field_type {
                    FieldType::FrameId => Field::FrameId(b),
                    FieldType::ModemStatus => Field::ModemStatus(b.into()),
                    FieldType::TxStatus => Field::TxStatus(b.into()),
                    FieldType::DiscoveryStatus => Field::DiscoveryStatus(b.into()),
                    FieldType::RegistrationStatus => Field::RegistrationStatus(b.into()),
                    _ => Field::U8(b),
                };
                Ok((field, rest))
            }
        }
    }
}
