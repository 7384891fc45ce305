//! The global collection of connected, ready-to-use output devices.

use std::sync::Arc;

use dashmap::DashMap;

/// Handle published for a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDeviceHandle {
    /// Stable device id (the port path).
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

/// Registry the rest of the application consumes to find devices that
/// can receive print jobs right now.
pub trait OutputDeviceRegistry: Send + Sync {
    /// Publish a device. Re-publishing the same id replaces the handle.
    fn add_output_device(&self, device: OutputDeviceHandle);

    /// Unpublish by id. Unknown ids are ignored.
    fn remove_output_device(&self, id: &str);

    /// Snapshot of the currently published devices.
    fn output_devices(&self) -> Vec<OutputDeviceHandle>;
}

/// Shared, lock-free registry of active output devices.
#[derive(Debug, Clone, Default)]
pub struct ActiveDeviceRegistry {
    devices: Arc<DashMap<String, OutputDeviceHandle>>,
}

impl ActiveDeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputDeviceRegistry for ActiveDeviceRegistry {
    fn add_output_device(&self, device: OutputDeviceHandle) {
        self.devices.insert(device.id.clone(), device);
    }

    fn remove_output_device(&self, id: &str) {
        self.devices.remove(id);
    }

    fn output_devices(&self) -> Vec<OutputDeviceHandle> {
        self.devices.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn handle(id: &str) -> OutputDeviceHandle {
        OutputDeviceHandle {
            id: id.to_string(),
            name: id.to_string(),
        }
    }

    #[test]
    fn test_add_and_remove() {
        let registry = ActiveDeviceRegistry::new();
        registry.add_output_device(handle("/dev/ttyUSB0"));
        registry.add_output_device(handle("/dev/ttyACM0"));
        assert_eq!(registry.output_devices().len(), 2);

        registry.remove_output_device("/dev/ttyUSB0");
        assert_eq!(registry.output_devices(), vec![handle("/dev/ttyACM0")]);
    }

    #[test]
    fn test_remove_unknown_id_is_ignored() {
        let registry = ActiveDeviceRegistry::new();
        registry.remove_output_device("/dev/ttyUSB9");
        assert!(registry.output_devices().is_empty());
    }

    #[test]
    fn test_republish_replaces() {
        let registry = ActiveDeviceRegistry::new();
        registry.add_output_device(handle("/dev/ttyUSB0"));
        registry.add_output_device(handle("/dev/ttyUSB0"));
        assert_eq!(registry.output_devices().len(), 1);
    }
}
