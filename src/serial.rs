//! tokio-serial backed transport, port enumeration, and device
//! construction.

use std::io;

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, sync::mpsc};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::{
    device::{DeviceEvent, PrinterOutputDevice},
    error::DeviceError,
    traits::{DeviceFactory, PortEnumerator, Transport},
};

/// Transport over a USB serial port. Nothing is opened until
/// [Transport::open] runs.
pub struct SerialTransport {
    port: String,
    baud: u32,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Create a transport for `port` at `baud`.
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut SerialStream, DeviceError> {
        self.stream
            .as_mut()
            .ok_or_else(|| DeviceError::Transport(io::Error::new(io::ErrorKind::NotConnected, "transport not open")))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<(), DeviceError> {
        let stream = tokio_serial::new(&self.port, self.baud)
            .open_native_async()
            .map_err(|e| DeviceError::Transport(io::Error::other(e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        // Dropping the stream releases the port.
        self.stream = None;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        let stream = self.stream()?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn flash(&mut self, image: &[u8]) -> Result<(), DeviceError> {
        // The byte-level flashing protocol lives below this abstraction;
        // the transport moves the payload in pages so progress shows up
        // in the logs of long flashes.
        let port = self.port.clone();
        let total = image.len();
        let stream = self.stream()?;
        for (i, page) in image.chunks(FLASH_PAGE_SIZE).enumerate() {
            stream.write_all(page).await?;
            tracing::debug!(
                port,
                written = (i * FLASH_PAGE_SIZE + page.len()).min(total),
                total,
                "flash page written"
            );
        }
        stream.flush().await?;
        Ok(())
    }
}

const FLASH_PAGE_SIZE: usize = 4096;

/// Enumerates USB serial ports that look like attached printers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortEnumerator;

#[async_trait]
impl PortEnumerator for SerialPortEnumerator {
    async fn scan(&self) -> Vec<String> {
        let ports = match tokio_serial::available_ports() {
            Ok(ports) => ports,
            Err(error) => {
                tracing::warn!(%error, "can not enumerate serial ports");
                return Vec::new();
            }
        };

        ports
            .into_iter()
            .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
            .map(|p| p.port_name)
            .filter(|name| is_printer_port(name))
            .collect()
    }
}

/// Path patterns for USB-attached printers.
///
/// Bluetooth-exposed serial devices are known false positives (macOS
/// sometimes lists them) and are excluded.
pub(crate) fn is_printer_port(name: &str) -> bool {
    if name.contains("Bluetooth") {
        return false;
    }

    if name.starts_with("COM") && name[3..].chars().all(|c| c.is_ascii_digit()) && name.len() > 3 {
        return true;
    }

    name.starts_with("/dev/ttyUSB") || name.starts_with("/dev/ttyACM") || name.starts_with("/dev/cu.usb")
}

/// Builds serial-backed devices for newly observed ports.
pub struct SerialDeviceFactory {
    baud: u32,
    extruders: usize,
}

impl SerialDeviceFactory {
    /// Create a factory that opens ports at `baud` and sizes hotend
    /// arrays to `extruders`.
    pub fn new(baud: u32, extruders: usize) -> Self {
        Self { baud, extruders }
    }
}

impl DeviceFactory for SerialDeviceFactory {
    fn build(&self, port: &str, events: mpsc::UnboundedSender<DeviceEvent>) -> PrinterOutputDevice {
        PrinterOutputDevice::new(port, self.extruders, Box::new(SerialTransport::new(port, self.baud)), events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_serial_paths_accepted() {
        assert!(is_printer_port("/dev/ttyUSB0"));
        assert!(is_printer_port("/dev/ttyACM3"));
        assert!(is_printer_port("/dev/cu.usbmodem1411"));
        assert!(is_printer_port("COM3"));
        assert!(is_printer_port("COM17"));
    }

    #[test]
    fn test_bluetooth_and_other_paths_excluded() {
        assert!(!is_printer_port("/dev/cu.Bluetooth-Incoming-Port"));
        assert!(!is_printer_port("/dev/ttyS0"));
        assert!(!is_printer_port("/dev/rfcomm0"));
        assert!(!is_printer_port("COM"));
        assert!(!is_printer_port("COMPORT"));
    }

    #[tokio::test]
    async fn test_write_before_open_is_a_transport_fault() {
        let mut transport = SerialTransport::new("/dev/ttyUSB0", 115_200);
        let err = transport.write(b"G28\n").await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(_)));
    }
}
