//! Framer
//!
//! Turns the received byte stream into validated API frames and, while the
//! module is in command mode, into carriage-return terminated text lines.
//! Outgoing payloads are framed, escaped and written to the transport.

use byteorder::{BigEndian, ByteOrder};
use std::io;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::codec::{checksum, encode_frame, unescape, START};
use super::stream::Transport;
use super::{ProtocolError, STANDARD_BAUD_RATES};

/// Result of one extraction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// A frame with a valid checksum
    Frame(Vec<u8>),
    /// A complete frame failed its checksum and was dropped
    Corrupt,
    /// Not enough data yet; nothing was consumed
    Incomplete,
}

/// Rolling receive buffer
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes currently buffered
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Try to take one frame off the front of the buffer.
    ///
    /// Data before the first start marker is dropped together with the frame
    /// that follows it. A frame that fails its checksum is consumed as well,
    /// so the next call resynchronizes on the following start marker.
    pub fn extract(&mut self) -> Extract {
        let Some(start) = self.buf.iter().position(|&b| b == START) else {
            return Extract::Incomplete;
        };

        let data = &self.buf[start + 1..];
        let Some((length, rest)) = unescape(data, 2) else {
            return Extract::Incomplete;
        };
        let length = BigEndian::read_u16(&length) as usize;
        let Some((payload, rest)) = unescape(rest, length) else {
            return Extract::Incomplete;
        };
        let Some((received, rest)) = unescape(rest, 1) else {
            return Extract::Incomplete;
        };

        let consumed = self.buf.len() - rest.len();
        let expected = checksum(&payload);
        self.buf.drain(..consumed);

        if expected == received[0] {
            Extract::Frame(payload)
        } else {
            warn!(
                "Dropping frame with bad checksum {:#04x} (expected {:#04x})",
                received[0], expected
            );
            Extract::Corrupt
        }
    }

    /// Take the buffered text if it forms a carriage-return terminated line
    pub fn take_line(&mut self) -> Option<String> {
        if self.buf.last() != Some(&b'\r') {
            return None;
        }
        let line = self.buf[..self.buf.len() - 1]
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect();
        self.buf.clear();
        Some(line)
    }
}

/// Unit of received data handed up to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Unescaped payload of an API frame
    Frame(Vec<u8>),
    /// A command-mode text response without its terminator
    CommandModeResponse(String),
}

/// Pending result of the connect handshake
pub type ConnectedSender = oneshot::Sender<Result<(), ProtocolError>>;

/// Framing layer on top of a [`Transport`]
pub struct Gateway {
    transport: Option<Box<dyn Transport>>,
    buffer: FrameBuffer,
    in_command_mode: bool,
    connected: Option<ConnectedSender>,
}

impl Gateway {
    /// Framer waiting for its transport
    pub fn new(connected: Option<ConnectedSender>) -> Self {
        Self {
            transport: None,
            buffer: FrameBuffer::new(),
            in_command_mode: false,
            connected,
        }
    }

    /// Framer over an already open transport
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        let mut gateway = Self::new(None);
        gateway.attach(transport);
        gateway
    }

    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>, ProtocolError> {
        self.transport.as_mut().ok_or(ProtocolError::NotConnected)
    }

    /// Frame `payload` and write it out
    pub fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let frame = encode_frame(payload)?;
        debug!("Sending frame: {:02x?}", payload);
        self.transport()?.write_all(&frame)
    }

    /// Write command-mode text as-is and start watching for a text reply
    pub fn command_mode_send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        debug!("Command mode sending {:?}", String::from_utf8_lossy(data));
        self.in_command_mode = true;
        self.transport()?.write_all(data)
    }

    /// Go back to interpreting the stream as API frames only
    pub fn reset_command_mode(&mut self) {
        self.in_command_mode = false;
    }

    pub fn in_command_mode(&self) -> bool {
        self.in_command_mode
    }

    /// Feed received bytes, returning everything that became complete
    pub fn data_received(&mut self, chunk: &[u8]) -> Vec<Inbound> {
        self.buffer.extend(chunk);

        let mut inbound = Vec::new();
        loop {
            match self.buffer.extract() {
                Extract::Frame(frame) => inbound.push(Inbound::Frame(frame)),
                Extract::Corrupt => continue,
                Extract::Incomplete => break,
            }
        }

        if self.in_command_mode {
            if let Some(line) = self.buffer.take_line() {
                debug!("Command mode response: {:?}", line);
                inbound.push(Inbound::CommandModeResponse(line));
            }
        }
        inbound
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.transport.as_ref().map(|t| t.baud_rate())
    }

    /// Change the link speed; only standard serial rates are accepted
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ProtocolError> {
        if !STANDARD_BAUD_RATES.contains(&baud_rate) {
            return Err(ProtocolError::InvalidBaudRate(baud_rate));
        }
        self.transport()?.set_baud_rate(baud_rate)
    }

    /// The transport reported it is up
    pub fn connection_made(&mut self) {
        if let Some(connected) = self.connected.take() {
            let _ = connected.send(Ok(()));
        }
    }

    /// The transport went away.
    ///
    /// Returns the error if the loss was unexpected and the session must be
    /// told about it.
    pub fn connection_lost(&mut self, error: Option<io::Error>) -> Option<ProtocolError> {
        match error {
            None => {
                debug!("Transport closed");
                if let Some(connected) = self.connected.take() {
                    let _ = connected.send(Ok(()));
                }
                None
            }
            Some(e) => {
                warn!("Transport lost: {}", e);
                if let Some(connected) = self.connected.take() {
                    let _ = connected.send(Err(ProtocolError::ConnectionFailed(e.to_string())));
                }
                Some(ProtocolError::ConnectionLost(e.to_string()))
            }
        }
    }

    /// Close the transport
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.buffer.clear();
    }
}
