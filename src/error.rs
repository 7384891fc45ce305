//! Error taxonomy for device and firmware handling.

use std::path::PathBuf;

use crate::state::ConnectionState;

/// Faults raised by a [crate::PrinterOutputDevice].
#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    /// A mandatory transport operation was invoked on a device whose
    /// transport does not implement it.
    #[error("{0} is not implemented by this output device")]
    NotImplemented(&'static str),

    /// A connection-state change was rejected by the transition table.
    #[error("illegal connection state transition: {from} -> {to}")]
    IllegalTransition {
        /// The state the device was in.
        from: ConnectionState,
        /// The state that was requested.
        to: ConnectionState,
    },

    /// A hotend index outside the device's extruder count.
    #[error("hotend index {index} out of range ({count} extruders)")]
    HotendIndexOutOfRange {
        /// The index that was requested.
        index: usize,
        /// The number of extruders the device has.
        count: usize,
    },

    /// The underlying transport reported an I/O fault.
    #[error("transport fault: {0}")]
    Transport(#[from] std::io::Error),
}

/// Faults raised while resolving or flashing firmware images.
#[derive(thiserror::Error, Debug)]
pub enum FirmwareError {
    /// No base table entry exists for the machine id. Fatal for a whole
    /// firmware batch; there is no image to flash anyone with.
    #[error("no firmware image known for machine {0}")]
    MissingImage(String),

    /// A resolved image could not be read or flashed.
    #[error("could not flash firmware image {}: {reason}", .path.display())]
    FlashFailure {
        /// Path of the image that failed.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The referenced port has no tracked device.
    #[error("no tracked device on port {0}")]
    UnknownPort(String),

    /// The device faulted while flashing.
    #[error(transparent)]
    Device(#[from] DeviceError),
}
