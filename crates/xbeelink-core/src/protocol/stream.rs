//! Byte transports
//!
//! The engine talks to the module through [`Transport`]. Received bytes flow
//! the other way through an [`EventSink`] the transport is given on open.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::serial::{configure_port, open_port};
use super::ProtocolError;

/// Downward interface to the byte link
pub trait Transport: Send {
    /// Write all of `data`
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Current baud rate
    fn baud_rate(&self) -> u32;

    /// Reconfigure the link speed
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ProtocolError>;

    /// Stop the link. No further events are delivered afterwards
    fn close(&mut self);
}

/// Something that happened on the link
#[derive(Debug)]
pub enum TransportEvent {
    /// The link is up and delivering data
    Opened,
    Data(Vec<u8>),
    /// The link went away; `None` for a clean close by the peer
    Closed(Option<io::Error>),
}

/// Receiver of transport events
pub type EventSink = Box<dyn FnMut(TransportEvent) + Send>;

/// Serial port transport with a dedicated reader thread
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    baud_rate: u32,
    closing: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Open and configure `path`, then start delivering events to `sink`
    pub fn open(path: &str, baud_rate: u32, sink: EventSink) -> Result<Self, ProtocolError> {
        let mut port = open_port(path, baud_rate)?;
        configure_port(port.as_mut())?;
        let reader = port.try_clone()?;

        let closing = Arc::new(AtomicBool::new(false));
        let reader_closing = Arc::clone(&closing);
        thread::Builder::new()
            .name(format!("xbee-reader {}", path))
            .spawn(move || read_loop(reader, reader_closing, sink))?;

        Ok(Self {
            port,
            baud_rate,
            closing,
        })
    }
}

fn read_loop(mut port: Box<dyn SerialPort>, closing: Arc<AtomicBool>, mut sink: EventSink) {
    sink(TransportEvent::Opened);

    let mut buf = [0u8; 1024];
    loop {
        if closing.load(Ordering::SeqCst) {
            debug!("Serial reader stopped");
            return;
        }
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                if closing.load(Ordering::SeqCst) {
                    return;
                }
                sink(TransportEvent::Data(buf[..n].to_vec()));
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                if !closing.load(Ordering::SeqCst) {
                    warn!("Serial read failed: {}", e);
                    sink(TransportEvent::Closed(Some(e)));
                }
                return;
            }
        }
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ProtocolError> {
        self.port.set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn close(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
