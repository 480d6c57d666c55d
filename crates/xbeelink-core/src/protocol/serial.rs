//! Serial port handling
//!
//! Port enumeration and the open/configure steps used by the serial transport.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use tracing::{debug, warn};

use super::ProtocolError;

/// Read timeout of the port; bounds how long the reader takes to notice `close()`
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// An available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// FTDI and Silicon Labs bridges are what XBee USB carrier boards ship with
    pub fn is_likely_xbee(&self) -> bool {
        matches!(self.vid, Some(0x0403) | Some(0x10C4))
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key: USB serial bridges (ttyUSB*) first, then ttyACM*, then the rest,
/// numeric suffixes compared as numbers
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyUSB"), (1u8, "ttyACM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List serial ports the module could be attached to, in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let port = PortInfo::from(info);
                map.entry(port.name.clone()).or_insert(port);
            }
        }
        Err(e) => warn!("Failed to enumerate serial ports: {}", e),
    }

    // udev-less containers do not report these through the API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open a serial port at `baud_rate`
pub fn open_port(path: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, ProtocolError> {
    debug!("Opening {} at {} baud", path, baud_rate);
    serialport::new(path, baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", path, e)))
}

/// 8N1, no flow control. The module's API mode escapes XON/XOFF itself
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;
    port.clear(serialport::ClearBuffer::All)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_list_ports() {
        // Only checks enumeration does not panic on this host
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let mut ports: Vec<PortInfo> = [
            "/dev/ttyACM1",
            "/dev/ttyUSB10",
            "/dev/someport",
            "/dev/ttyUSB2",
            "/dev/ttyACM0",
        ]
        .into_iter()
        .map(|n| PortInfo::bare(n.to_string()))
        .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB2",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_likely_xbee() {
        let mut port = PortInfo::bare("/dev/ttyUSB0".to_string());
        assert!(!port.is_likely_xbee());
        port.vid = Some(0x0403);
        assert!(port.is_likely_xbee());
    }
}
