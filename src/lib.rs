#![deny(missing_docs)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! Connectivity for USB-attached 3D printers: a device abstraction with
//! a guarded connection-state machine, periodic serial-port discovery,
//! publication of connected devices into a shared registry, and
//! firmware update orchestration.

pub mod config;
mod device;
mod error;
pub mod firmware;
mod manager;
mod noop;
mod registry;
pub mod serial;
mod state;
mod traits;

pub use config::{Config, MachineConfig};
pub use device::{DeviceEvent, PrinterOutputDevice, DEFAULT_FEED_RATE, PROGRESS_FAILED, PROGRESS_NONE};
pub use error::{DeviceError, FirmwareError};
pub use manager::{ManagerEvent, UsbPrinterManager};
pub use noop::{LogProgressSurface, NullTransport};
pub use registry::{ActiveDeviceRegistry, OutputDeviceHandle, OutputDeviceRegistry};
pub use state::ConnectionState;
pub use traits::{
    DeviceFactory, FirmwareStore, MachineProfileProvider, MotionControl, PortEnumerator, ProgressSurface,
    TemperatureControl, Transport,
};
