//! Seams between the connectivity core and its collaborators.
//!
//! Every concrete device variant is assembled from a mandatory
//! [Transport] plus whichever optional capabilities it actually has.
//! The manager-side traits ([PortEnumerator], [DeviceFactory],
//! [MachineProfileProvider], [FirmwareStore], [ProgressSurface]) exist
//! so the application can wire in its own platform pieces, and so tests
//! can drive the manager with fakes.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    device::{DeviceEvent, PrinterOutputDevice},
    error::{DeviceError, FirmwareError},
};

/// The wire to a physically attached printer.
///
/// Mandatory for every device; opening, closing, and writing have no
/// permissive default. A device that has nothing wired up uses
/// [crate::NullTransport], whose operations fail with
/// [DeviceError::NotImplemented].
#[async_trait]
pub trait Transport: Send {
    /// Open the transport. This blocks the calling context for the
    /// duration of the connection attempt.
    async fn open(&mut self) -> Result<(), DeviceError>;

    /// Close the transport. Closing a transport that never opened must
    /// not fail.
    async fn close(&mut self) -> Result<(), DeviceError>;

    /// Write a job payload to the device.
    async fn write(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Flash a firmware image to the device's embedded controller.
    async fn flash(&mut self, image: &[u8]) -> Result<(), DeviceError>;
}

/// Optional head-motion capability of a device.
///
/// All distances are millimeters, all feed rates millimeters per minute.
#[async_trait]
pub trait MotionControl: Send {
    /// Home the head.
    async fn home_head(&mut self) -> Result<(), DeviceError>;

    /// Home the bed.
    async fn home_bed(&mut self) -> Result<(), DeviceError>;

    /// Move the head relative to its current position.
    async fn move_head(&mut self, dx: f64, dy: f64, dz: f64, speed: f64) -> Result<(), DeviceError>;

    /// Move the head to an absolute position.
    async fn set_head_position(&mut self, x: f64, y: f64, z: f64, speed: f64) -> Result<(), DeviceError>;

    /// Move the head to an absolute X position.
    async fn set_head_x(&mut self, x: f64, speed: f64) -> Result<(), DeviceError>;

    /// Move the head to an absolute Y position.
    async fn set_head_y(&mut self, y: f64, speed: f64) -> Result<(), DeviceError>;

    /// Move the head to an absolute Z position.
    async fn set_head_z(&mut self, z: f64, speed: f64) -> Result<(), DeviceError>;
}

/// Optional temperature capability of a device.
#[async_trait]
pub trait TemperatureControl: Send {
    /// Request a new target bed temperature, in degrees celsius.
    async fn set_target_bed_temperature(&mut self, celsius: f64) -> Result<(), DeviceError>;

    /// Request a new target temperature for one hotend, in degrees
    /// celsius. The index has already been bounds-checked by the device.
    async fn set_target_hotend_temperature(&mut self, index: usize, celsius: f64) -> Result<(), DeviceError>;
}

/// Enumerates candidate printer ports attached to this host.
///
/// Enumeration faults degrade to an empty scan for that cycle; they are
/// never fatal and never surface past the implementation.
#[async_trait]
pub trait PortEnumerator: Send + Sync {
    /// Return the set of candidate printer ports currently attached.
    async fn scan(&self) -> Vec<String>;
}

/// Builds a device for a newly observed port.
///
/// Construction runs on the manager's owner context only.
pub trait DeviceFactory: Send {
    /// Construct (but do not connect) a device for `port`, wiring its
    /// notifications into `events`.
    fn build(&self, port: &str, events: mpsc::UnboundedSender<DeviceEvent>) -> PrinterOutputDevice;
}

/// The active machine profile, as configured by the application.
pub trait MachineProfileProvider: Send + Sync {
    /// Stable id of the active machine definition.
    fn machine_id(&self) -> String;

    /// Whether the active profile has the heated-bed option enabled.
    fn heated_bed_enabled(&self) -> bool;
}

/// Resolves firmware image files on disk, keyed by category and
/// filename.
pub trait FirmwareStore: Send + Sync {
    /// Resolve `filename` under `category`. An absent file is a
    /// [FirmwareError::FlashFailure].
    fn resolve(&self, category: &str, filename: &str) -> Result<PathBuf, FirmwareError>;
}

/// Presentation surface for firmware flashing progress.
///
/// GUI integration lives outside this crate; [crate::LogProgressSurface]
/// stands in when nothing is attached.
pub trait ProgressSurface: Send {
    /// Show the surface. Showing an already-open surface reuses it.
    fn show(&mut self);

    /// Close the surface.
    fn close(&mut self);
}
