//! Stand-ins for devices and surfaces that have nothing wired up.

use async_trait::async_trait;

use crate::{
    error::DeviceError,
    traits::{ProgressSurface, Transport},
};

/// Transport for a device with no wire behind it. Every mandatory
/// operation fails with [DeviceError::NotImplemented]; there is no
/// permissive default for connecting, closing, or writing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn open(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::NotImplemented("connect"))
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::NotImplemented("close"))
    }

    async fn write(&mut self, _data: &[u8]) -> Result<(), DeviceError> {
        Err(DeviceError::NotImplemented("request_write"))
    }

    async fn flash(&mut self, _image: &[u8]) -> Result<(), DeviceError> {
        Err(DeviceError::NotImplemented("flash"))
    }
}

/// Progress surface that only logs. Used when no GUI is attached.
#[derive(Debug, Default)]
pub struct LogProgressSurface {
    open: bool,
}

impl ProgressSurface for LogProgressSurface {
    fn show(&mut self) {
        if !self.open {
            tracing::info!("firmware update started");
            self.open = true;
        }
    }

    fn close(&mut self) {
        if self.open {
            tracing::info!("firmware update view closed");
            self.open = false;
        }
    }
}
