//! Byte codec
//!
//! Escaping, unescaping and checksums for the API frame format.
//!
//! Frame format (escaped API mode, `AP=2`):
//! - 1 byte: start delimiter `0x7E` (never escaped)
//! - 2 bytes: payload length (big-endian, unescaped length)
//! - N bytes: payload (frame type + frame data)
//! - 1 byte: checksum (`0xFF - sum(payload)`)
//!
//! Everything after the start delimiter is escaped.

use byteorder::{BigEndian, ByteOrder};

use super::ProtocolError;

/// Start-of-frame delimiter
pub const START: u8 = 0x7E;
/// Escape marker
pub const ESCAPE: u8 = 0x7D;
/// Software flow control: resume
pub const XON: u8 = 0x11;
/// Software flow control: pause
pub const XOFF: u8 = 0x13;

/// Bytes that must be escaped on the wire
pub const RESERVED: [u8; 4] = [START, ESCAPE, XON, XOFF];

const ESCAPE_MASK: u8 = 0x20;

/// Escape every reserved byte as `ESCAPE, byte ^ 0x20`
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 4);
    for &byte in data {
        if RESERVED.contains(&byte) {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_MASK);
        } else {
            out.push(byte);
        }
    }
    out
}

/// Produce `n` logical bytes from the start of `data`, reversing the escape.
///
/// Returns the bytes and the unconsumed remainder, or `None` when `data`
/// does not yet hold `n` complete logical bytes (including a trailing
/// escape marker with no byte after it). Underflow is not an error: the
/// caller waits for more input.
pub fn unescape(data: &[u8], n: usize) -> Option<(Vec<u8>, &[u8])> {
    let mut out = Vec::with_capacity(n);
    let mut idx = 0;

    while out.len() < n && idx < data.len() {
        let mut byte = data[idx];
        if byte == ESCAPE {
            idx += 1;
            if idx >= data.len() {
                return None;
            }
            byte = data[idx] ^ ESCAPE_MASK;
        }
        out.push(byte);
        idx += 1;
    }

    if out.len() < n {
        return None;
    }
    Some((out, &data[idx..]))
}

/// 8-bit frame checksum: `0xFF - (sum(data) mod 256)`
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}

/// Build the complete wire representation of a frame payload
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > u16::MAX as usize {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut raw = Vec::with_capacity(2 + payload.len() + 1);
    let mut len_bytes = [0u8; 2];
    BigEndian::write_u16(&mut len_bytes, payload.len() as u16);
    raw.extend_from_slice(&len_bytes);
    raw.extend_from_slice(payload);
    raw.push(checksum(payload));

    let escaped = escape(&raw);
    let mut frame = Vec::with_capacity(1 + escaped.len());
    frame.push(START);
    frame.extend_from_slice(&escaped);
    Ok(frame)
}
