//! Per-device state holder and state machine for a printer attached
//! over a transport.
//!
//! A [PrinterOutputDevice] is owned by exactly one context (the
//! manager's owner task); it is never shared across concurrent
//! mutators. Every mutator that changes observable state pushes exactly
//! one [DeviceEvent] per logical change, batching simultaneous field
//! updates (head position) into a single notification.

use std::path::Path;

use tokio::sync::mpsc;

use crate::{
    error::{DeviceError, FirmwareError},
    state::ConnectionState,
    traits::{MotionControl, TemperatureControl, Transport},
};

/// Progress value meaning "no active operation".
pub const PROGRESS_NONE: f64 = -1.0;

/// Terminal progress value assigned to a device whose flash failed.
pub const PROGRESS_FAILED: f64 = 100.0;

/// Feed rate used when callers have no better idea, in mm/minute.
pub const DEFAULT_FEED_RATE: f64 = 3000.0;

/// A change notification emitted by a device.
///
/// Every event carries the id of the emitting device so subscribers can
/// identify the source without a separate lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The measured bed temperature changed.
    BedTemperature {
        /// Id of the emitting device.
        device: String,
        /// New temperature in degrees celsius.
        celsius: f64,
    },

    /// The target bed temperature changed.
    TargetBedTemperature {
        /// Id of the emitting device.
        device: String,
        /// New target in degrees celsius.
        celsius: f64,
    },

    /// A measured hotend temperature changed.
    HotendTemperature {
        /// Id of the emitting device.
        device: String,
        /// Index of the hotend.
        index: usize,
        /// New temperature in degrees celsius.
        celsius: f64,
    },

    /// A target hotend temperature changed.
    TargetHotendTemperature {
        /// Id of the emitting device.
        device: String,
        /// Index of the hotend.
        index: usize,
        /// New target in degrees celsius.
        celsius: f64,
    },

    /// Progress of the active operation changed.
    Progress {
        /// Id of the emitting device.
        device: String,
        /// New progress in [0, 100], or [PROGRESS_NONE].
        percent: f64,
    },

    /// The head position changed on at least one axis.
    HeadPosition {
        /// Id of the emitting device.
        device: String,
        /// X position in millimeters.
        x: f64,
        /// Y position in millimeters.
        y: f64,
        /// Z position in millimeters.
        z: f64,
    },

    /// The connection state changed.
    ConnectionState {
        /// Id of the emitting device.
        device: String,
        /// The new state.
        state: ConnectionState,
    },
}

macro_rules! motion_hook {
    ($slf:ident, $op:literal, $ctl:ident => $call:expr) => {
        match $slf.motion.as_mut() {
            Some($ctl) => {
                if let Err(error) = $call {
                    tracing::warn!(device = %$slf.id, %error, concat!($op, " failed"));
                }
            }
            None => {
                tracing::warn!(device = %$slf.id, concat!("device has no motion control; ", $op, " ignored"));
            }
        }
    };
}

/// State holder and state machine for one physically attached printer.
///
/// The device is assembled from a mandatory [Transport] plus optional
/// motion and temperature capabilities; requesting an operation the
/// device has no capability for logs a warning and does nothing.
pub struct PrinterOutputDevice {
    id: String,
    connection_state: ConnectionState,
    bed_temperature: f64,
    target_bed_temperature: f64,
    hotend_temperatures: Vec<f64>,
    target_hotend_temperatures: Vec<f64>,
    head_x: f64,
    head_y: f64,
    head_z: f64,
    progress: f64,
    transport: Box<dyn Transport>,
    motion: Option<Box<dyn MotionControl>>,
    temperature: Option<Box<dyn TemperatureControl>>,
    events: mpsc::UnboundedSender<DeviceEvent>,
}

impl PrinterOutputDevice {
    /// Create a new device for `id` (the port path). The hotend arrays
    /// are sized to `extruders` and stay that length for the device's
    /// life.
    pub fn new(
        id: impl Into<String>,
        extruders: usize,
        transport: Box<dyn Transport>,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Self {
        Self {
            id: id.into(),
            connection_state: ConnectionState::Closed,
            bed_temperature: 0.0,
            target_bed_temperature: 0.0,
            hotend_temperatures: vec![0.0; extruders],
            target_hotend_temperatures: vec![0.0; extruders],
            head_x: 0.0,
            head_y: 0.0,
            head_z: 0.0,
            progress: PROGRESS_NONE,
            transport,
            motion: None,
            temperature: None,
            events,
        }
    }

    /// Attach a motion capability.
    pub fn with_motion_control(mut self, motion: Box<dyn MotionControl>) -> Self {
        self.motion = Some(motion);
        self
    }

    /// Attach a temperature capability.
    pub fn with_temperature_control(mut self, temperature: Box<dyn TemperatureControl>) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Stable identifier of this device (its port path).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    /// Last reported bed temperature, in degrees celsius.
    pub fn bed_temperature(&self) -> f64 {
        self.bed_temperature
    }

    /// Last requested target bed temperature, in degrees celsius.
    pub fn target_bed_temperature(&self) -> f64 {
        self.target_bed_temperature
    }

    /// Last reported hotend temperatures, one slot per extruder.
    pub fn hotend_temperatures(&self) -> &[f64] {
        &self.hotend_temperatures
    }

    /// Last requested target hotend temperatures, one slot per extruder.
    pub fn target_hotend_temperatures(&self) -> &[f64] {
        &self.target_hotend_temperatures
    }

    /// Number of extruders this device was created with.
    pub fn extruder_count(&self) -> usize {
        self.hotend_temperatures.len()
    }

    /// Last known head position as (x, y, z), in millimeters. On some
    /// machines the bed is what actually moves; it is all reported as
    /// head movement here.
    pub fn head_position(&self) -> (f64, f64, f64) {
        (self.head_x, self.head_y, self.head_z)
    }

    /// Progress of the active operation in [0, 100], or [PROGRESS_NONE]
    /// when nothing is running.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    fn emit(&self, event: DeviceEvent) {
        // The receiver going away means the manager is shutting down;
        // nothing useful to do with the event then.
        let _ = self.events.send(event);
    }

    /// Set the connection state, validating the move against the
    /// transition table. Stores and emits unconditionally once the
    /// transition is accepted, including re-reports of the current
    /// state.
    pub fn set_connection_state(&mut self, state: ConnectionState) -> Result<(), DeviceError> {
        if !self.connection_state.can_transition_to(state) {
            return Err(DeviceError::IllegalTransition {
                from: self.connection_state,
                to: state,
            });
        }
        self.connection_state = state;
        self.emit(DeviceEvent::ConnectionState {
            device: self.id.clone(),
            state,
        });
        Ok(())
    }

    /// Attempt to establish the connection. Blocks the calling context
    /// for the duration of the transport open; invoke from the owner
    /// context only.
    pub async fn connect(&mut self) -> Result<(), DeviceError> {
        self.set_connection_state(ConnectionState::Connecting)?;
        match self.transport.open().await {
            Ok(()) => self.set_connection_state(ConnectionState::Connected),
            Err(error) => {
                self.set_connection_state(ConnectionState::Error)?;
                Err(error)
            }
        }
    }

    /// Close the connection. The state always ends up
    /// [ConnectionState::Closed]; a transport fault on the way there is
    /// still returned.
    pub async fn close(&mut self) -> Result<(), DeviceError> {
        let result = self.transport.close().await;
        self.set_connection_state(ConnectionState::Closed)?;
        result
    }

    /// Send a job payload to the device. The device is busy for the
    /// duration of the write; an I/O fault moves it to
    /// [ConnectionState::Error].
    pub async fn request_write(
        &mut self,
        data: &[u8],
        job_name: &str,
        filter_by_machine: bool,
    ) -> Result<(), DeviceError> {
        self.set_connection_state(ConnectionState::Busy)?;
        tracing::debug!(
            device = %self.id,
            job = job_name,
            filter_by_machine,
            bytes = data.len(),
            "writing job to device"
        );
        match self.transport.write(data).await {
            Ok(()) => self.set_connection_state(ConnectionState::Connected),
            Err(error) => {
                self.set_connection_state(ConnectionState::Error)?;
                Err(error)
            }
        }
    }

    /// Flash a firmware image from `image` to the device. An absent or
    /// unreadable image fails before any byte is sent and before the
    /// state machine moves. The device is busy for the duration of the
    /// flash; a flash fault moves it to [ConnectionState::Error].
    /// Progress runs 0 to 100 over the flash.
    pub async fn update_firmware(&mut self, image: &Path) -> Result<(), FirmwareError> {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| FirmwareError::FlashFailure {
                path: image.to_path_buf(),
                reason: e.to_string(),
            })?;

        tracing::info!(device = %self.id, image = %image.display(), "flashing firmware");
        self.set_connection_state(ConnectionState::Busy)?;
        self.set_progress(0.0);
        match self.transport.flash(&bytes).await {
            Ok(()) => {
                self.set_progress(100.0);
                self.set_connection_state(ConnectionState::Connected)?;
                Ok(())
            }
            Err(error) => {
                self.set_connection_state(ConnectionState::Error)?;
                Err(FirmwareError::FlashFailure {
                    path: image.to_path_buf(),
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Request a new target bed temperature. Invokes the temperature
    /// capability, stores the value, and emits exactly one notification,
    /// unconditionally.
    pub async fn set_target_bed_temperature(&mut self, celsius: f64) {
        match self.temperature.as_mut() {
            Some(ctl) => {
                if let Err(error) = ctl.set_target_bed_temperature(celsius).await {
                    tracing::warn!(device = %self.id, %error, "set target bed temperature failed");
                }
            }
            None => {
                tracing::warn!(device = %self.id, "device has no temperature control; target bed temperature ignored");
            }
        }
        self.target_bed_temperature = celsius;
        self.emit(DeviceEvent::TargetBedTemperature {
            device: self.id.clone(),
            celsius,
        });
    }

    /// Request a new target temperature for hotend `index`. An index at
    /// or beyond the extruder count fails hard; it is a caller bug, not
    /// something to clamp away.
    pub async fn set_target_hotend_temperature(&mut self, index: usize, celsius: f64) -> Result<(), DeviceError> {
        if index >= self.target_hotend_temperatures.len() {
            return Err(DeviceError::HotendIndexOutOfRange {
                index,
                count: self.target_hotend_temperatures.len(),
            });
        }
        match self.temperature.as_mut() {
            Some(ctl) => {
                if let Err(error) = ctl.set_target_hotend_temperature(index, celsius).await {
                    tracing::warn!(device = %self.id, %error, "set target hotend temperature failed");
                }
            }
            None => {
                tracing::warn!(device = %self.id, "device has no temperature control; target hotend temperature ignored");
            }
        }
        self.target_hotend_temperatures[index] = celsius;
        self.emit(DeviceEvent::TargetHotendTemperature {
            device: self.id.clone(),
            index,
            celsius,
        });
        Ok(())
    }

    /// Record a bed temperature reported by the device. Stores and
    /// emits.
    pub fn update_bed_temperature(&mut self, celsius: f64) {
        self.bed_temperature = celsius;
        self.emit(DeviceEvent::BedTemperature {
            device: self.id.clone(),
            celsius,
        });
    }

    /// Record a hotend temperature reported by the device. Stores and
    /// emits.
    pub fn update_hotend_temperature(&mut self, index: usize, celsius: f64) -> Result<(), DeviceError> {
        if index >= self.hotend_temperatures.len() {
            return Err(DeviceError::HotendIndexOutOfRange {
                index,
                count: self.hotend_temperatures.len(),
            });
        }
        self.hotend_temperatures[index] = celsius;
        self.emit(DeviceEvent::HotendTemperature {
            device: self.id.clone(),
            index,
            celsius,
        });
        Ok(())
    }

    /// Record progress of the active operation. Emits only when the
    /// value actually changed.
    pub fn set_progress(&mut self, percent: f64) {
        if self.progress == percent {
            return;
        }
        self.progress = percent;
        self.emit(DeviceEvent::Progress {
            device: self.id.clone(),
            percent,
        });
    }

    /// Record a head position reported by the device. Each axis is
    /// compared independently; if any differs, all three are updated and
    /// exactly one notification goes out. Never one per axis.
    pub fn update_head_position(&mut self, x: f64, y: f64, z: f64) {
        if self.head_x == x && self.head_y == y && self.head_z == z {
            return;
        }
        self.head_x = x;
        self.head_y = y;
        self.head_z = z;
        self.emit(DeviceEvent::HeadPosition {
            device: self.id.clone(),
            x,
            y,
            z,
        });
    }

    /// Home the head.
    pub async fn home_head(&mut self) {
        motion_hook!(self, "home head", ctl => ctl.home_head().await);
    }

    /// Home the bed.
    pub async fn home_bed(&mut self) {
        motion_hook!(self, "home bed", ctl => ctl.home_bed().await);
    }

    /// Move the head relative to its current position.
    pub async fn move_head(&mut self, dx: f64, dy: f64, dz: f64, speed: f64) {
        motion_hook!(self, "move head", ctl => ctl.move_head(dx, dy, dz, speed).await);
    }

    /// Move the head to an absolute position.
    pub async fn set_head_position(&mut self, x: f64, y: f64, z: f64, speed: f64) {
        motion_hook!(self, "set head position", ctl => ctl.set_head_position(x, y, z, speed).await);
    }

    /// Move the head to an absolute X position.
    pub async fn set_head_x(&mut self, x: f64, speed: f64) {
        motion_hook!(self, "set head x", ctl => ctl.set_head_x(x, speed).await);
    }

    /// Move the head to an absolute Y position.
    pub async fn set_head_y(&mut self, y: f64, speed: f64) {
        motion_hook!(self, "set head y", ctl => ctl.set_head_y(y, speed).await);
    }

    /// Move the head to an absolute Z position.
    pub async fn set_head_z(&mut self, z: f64, speed: f64) {
        motion_hook!(self, "set head z", ctl => ctl.set_head_z(z, speed).await);
    }
}
