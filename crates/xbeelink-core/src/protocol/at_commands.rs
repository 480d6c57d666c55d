//! Local AT command table
//!
//! Maps two-character AT mnemonics to the codec of their parameter/response
//! value. Used both to serialize request arguments and to decode the value
//! carried by an AT command response.

use byteorder::{BigEndian, ByteOrder};

use super::ProtocolError;

/// How the value of an AT command is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtValueType {
    U8,
    /// Big-endian u16
    U16,
    /// Big-endian u32
    U32,
    /// Big-endian u64
    U64,
    /// Single byte, non-zero is true
    Bool,
    /// Raw bytes
    Bytes,
    /// Command takes no value and returns none
    NoValue,
}

/// A typed AT command parameter or response value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl AtValue {
    /// Integer view of the value, if it has one
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AtValue::U8(v) => Some(*v as u64),
            AtValue::U16(v) => Some(*v as u64),
            AtValue::U32(v) => Some(*v as u64),
            AtValue::U64(v) => Some(*v),
            AtValue::Bool(v) => Some(*v as u64),
            AtValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AtValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<u8> for AtValue {
    fn from(v: u8) -> Self {
        AtValue::U8(v)
    }
}

impl From<u16> for AtValue {
    fn from(v: u16) -> Self {
        AtValue::U16(v)
    }
}

impl From<u32> for AtValue {
    fn from(v: u32) -> Self {
        AtValue::U32(v)
    }
}

impl From<u64> for AtValue {
    fn from(v: u64) -> Self {
        AtValue::U64(v)
    }
}

impl From<bool> for AtValue {
    fn from(v: bool) -> Self {
        AtValue::Bool(v)
    }
}

impl From<Vec<u8>> for AtValue {
    fn from(v: Vec<u8>) -> Self {
        AtValue::Bytes(v)
    }
}

impl From<&[u8]> for AtValue {
    fn from(v: &[u8]) -> Self {
        AtValue::Bytes(v.to_vec())
    }
}

impl AtValueType {
    fn width(&self) -> Option<usize> {
        match self {
            AtValueType::U8 | AtValueType::Bool => Some(1),
            AtValueType::U16 => Some(2),
            AtValueType::U32 => Some(4),
            AtValueType::U64 => Some(8),
            AtValueType::Bytes | AtValueType::NoValue => None,
        }
    }

    /// Serialize an optional argument for `command`.
    ///
    /// Integer arguments are accepted from any integer variant as long as the
    /// value fits the command's width.
    pub fn encode(&self, command: &str, value: Option<&AtValue>) -> Result<Vec<u8>, ProtocolError> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };

        match (self, value) {
            (AtValueType::NoValue, _) => Err(ProtocolError::SchemaMismatch(format!(
                "AT{} takes no value",
                command
            ))),
            (AtValueType::Bytes, AtValue::Bytes(bytes)) => Ok(bytes.clone()),
            (AtValueType::Bytes, other) => Err(ProtocolError::SchemaMismatch(format!(
                "AT{} expects bytes, got {:?}",
                command, other
            ))),
            (integer_type, value) => {
                let width = integer_type.width().unwrap_or(8);
                let raw = value.as_u64().ok_or_else(|| {
                    ProtocolError::SchemaMismatch(format!(
                        "AT{} expects an integer, got {:?}",
                        command, value
                    ))
                })?;
                let max = if width >= 8 {
                    u64::MAX
                } else {
                    (1u64 << (width * 8)) - 1
                };
                if raw > max || (*integer_type == AtValueType::Bool && raw > 1) {
                    return Err(ProtocolError::ValueOutOfRange {
                        command: command.to_string(),
                        value: raw,
                    });
                }
                let mut buf = [0u8; 8];
                BigEndian::write_u64(&mut buf, raw);
                Ok(buf[8 - width..].to_vec())
            }
        }
    }

    /// Decode a non-empty response value
    pub fn decode(&self, command: &str, data: &[u8]) -> Result<Option<AtValue>, ProtocolError> {
        if *self == AtValueType::NoValue || data.is_empty() {
            return Ok(None);
        }
        if *self == AtValueType::Bytes {
            return Ok(Some(AtValue::Bytes(data.to_vec())));
        }

        let width = self.width().unwrap_or(1);
        if data.len() < width {
            return Err(ProtocolError::MalformedFrame(format!(
                "AT{} value needs {} bytes, got {}",
                command,
                width,
                data.len()
            )));
        }
        let value = match self {
            AtValueType::U8 => AtValue::U8(data[0]),
            AtValueType::Bool => AtValue::Bool(data[0] != 0),
            AtValueType::U16 => AtValue::U16(BigEndian::read_u16(data)),
            AtValueType::U32 => AtValue::U32(BigEndian::read_u32(data)),
            _ => AtValue::U64(BigEndian::read_u64(data)),
        };
        Ok(Some(value))
    }
}

/// Look up the value codec of an AT mnemonic
pub fn at_command_type(command: &str) -> Option<AtValueType> {
    use AtValueType::*;

    let value_type = match command {
        // Addressing
        "DH" | "DL" | "NC" | "SH" | "SL" | "DD" => U32,
        "MY" | "MP" | "CI" | "NP" => U16,
        "SE" | "DE" | "TO" | "CR" => U8,
        "NI" => Bytes,
        // Networking
        "CH" | "NH" | "BH" | "NT" | "NO" | "SD" | "ZS" | "NJ" | "AR" => U8,
        "ID" | "OP" => U64,
        "OI" | "SC" | "NW" | "II" => U16,
        "JV" | "JN" | "DJ" => Bool,
        "DA" => NoValue,
        // Security
        "EE" => Bool,
        "EO" => U8,
        "NK" | "KY" => Bytes,
        "KT" => U16,
        // RF interfacing
        "PM" => Bool,
        "PL" | "DB" | "PP" | "AP" | "AO" | "BD" | "NB" | "SB" | "RO" | "D6" | "D7" | "P3"
        | "P4" => U8,
        // MAC diagnostics
        "ED" => Bytes,
        // I/O
        "IR" | "IC" | "PR" | "%V" | "V+" | "TP" | "M0" | "M1" => U16,
        "D0" | "D1" | "D2" | "D3" | "D4" | "D5" | "D8" | "D9" | "P0" | "P1" | "P2" | "P5"
        | "P6" | "P7" | "P8" | "P9" | "LT" | "RP" => U8,
        // Diagnostics
        "VR" | "HV" => U16,
        "AI" => U8,
        // AT command options
        "CT" | "GT" => U16,
        "CC" => U8,
        "CN" => NoValue,
        // Sleep
        "SM" | "SO" => U8,
        "SN" | "SP" | "ST" | "WH" | "PO" => U16,
        "SI" => NoValue,
        // Execution
        "AC" | "WR" | "RE" | "FR" | "IS" | "1S" | "AS" => NoValue,
        "NR" => Bool,
        "CB" => U8,
        "ND" | "DN" => Bytes,
        "CE" => U8,
        _ => return None,
    };
    Some(value_type)
}

/// Command-mode baud rate settings, ascending
pub const BAUD_RATE_TO_BD: [(u32, &str); 9] = [
    (1200, "ATBD0"),
    (2400, "ATBD1"),
    (4800, "ATBD2"),
    (9600, "ATBD3"),
    (19200, "ATBD4"),
    (38400, "ATBD5"),
    (57600, "ATBD6"),
    (115200, "ATBD7"),
    (230400, "ATBD8"),
];

/// The `ATBDn` command that selects `baud_rate`, if the module supports it
pub fn baud_rate_command(baud_rate: u32) -> Option<&'static str> {
    BAUD_RATE_TO_BD
        .iter()
        .find(|(rate, _)| *rate == baud_rate)
        .map(|(_, cmd)| *cmd)
}

/// Baud rates tried, in order, while searching for the module in command mode
pub fn candidate_baud_rates() -> impl Iterator<Item = u32> {
    BAUD_RATE_TO_BD.iter().map(|(rate, _)| *rate)
}
