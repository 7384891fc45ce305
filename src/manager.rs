//! Discovery, registry hand-off, and firmware orchestration for USB
//! printers.
//!
//! The manager splits its work across two execution contexts. A single
//! discovery worker task polls the OS for candidate ports and pushes
//! each full scan result into a bounded channel; it holds no device
//! references. Everything else -- device construction, mutation,
//! removal, and the `known_ports`/`devices` bookkeeping -- happens on
//! the owner context that drains that channel via [UsbPrinterManager::tick]
//! or [UsbPrinterManager::run]. Because exactly one context ever touches
//! that state, none of it needs a lock.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    config::Config,
    device::{DeviceEvent, PrinterOutputDevice, PROGRESS_FAILED},
    error::FirmwareError,
    firmware::{resolve_image, DirFirmwareStore, FIRMWARE_CATEGORY},
    noop::LogProgressSurface,
    registry::{ActiveDeviceRegistry, OutputDeviceHandle, OutputDeviceRegistry},
    serial::{SerialDeviceFactory, SerialPortEnumerator},
    state::ConnectionState,
    traits::{DeviceFactory, FirmwareStore, MachineProfileProvider, PortEnumerator, ProgressSurface},
};

/// Fleet-level notifications published by the manager.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// The aggregated progress across all tracked devices changed.
    Progress(f64),

    /// A device's connection state changed, or a device came or went.
    ConnectionStateChanged,

    /// A condition the user should see.
    UserMessage(String),
}

/// Keeps one [PrinterOutputDevice] per attached USB printer.
///
/// Construct one per application, wire collaborators with the `with_*`
/// builders, then [start][UsbPrinterManager::start] discovery and drive
/// the owner context with [run][UsbPrinterManager::run] or
/// [tick][UsbPrinterManager::tick]. [start][UsbPrinterManager::start]
/// and [stop][UsbPrinterManager::stop] are not safe to invoke
/// concurrently with each other.
pub struct UsbPrinterManager {
    config: Config,

    known_ports: HashSet<String>,
    devices: HashMap<String, PrinterOutputDevice>,
    // Ports currently published to the registry; the exactly-once
    // publish/unpublish guarantee lives here.
    published: HashSet<String>,

    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,

    scan_tx: mpsc::Sender<Vec<String>>,
    scan_rx: mpsc::Receiver<Vec<String>>,
    events_tx: mpsc::UnboundedSender<DeviceEvent>,
    events_rx: mpsc::UnboundedReceiver<DeviceEvent>,
    manager_events: broadcast::Sender<ManagerEvent>,

    enumerator: Arc<dyn PortEnumerator>,
    factory: Box<dyn DeviceFactory>,
    profile: Box<dyn MachineProfileProvider>,
    firmware_store: Box<dyn FirmwareStore>,
    registry: Arc<dyn OutputDeviceRegistry>,
    progress_surface: Box<dyn ProgressSurface>,
}

impl UsbPrinterManager {
    /// Create a manager wired to the real serial stack. Any collaborator
    /// can be swapped with the `with_*` builders before
    /// [start][Self::start].
    pub fn new(config: Config) -> Self {
        // Capacity 1: a scan the owner has not drained yet is fully
        // superseded by the next one.
        let (scan_tx, scan_rx) = mpsc::channel(1);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (manager_events, _) = broadcast::channel(64);
        let machine = config.machine.clone();

        Self {
            enumerator: Arc::new(SerialPortEnumerator),
            factory: Box::new(SerialDeviceFactory::new(config.baud_rate, machine.extruders)),
            profile: Box::new(machine),
            firmware_store: Box::new(DirFirmwareStore::new(config.firmware_root.clone())),
            registry: Arc::new(ActiveDeviceRegistry::new()),
            progress_surface: Box::new(LogProgressSurface::default()),
            config,
            known_ports: HashSet::new(),
            devices: HashMap::new(),
            published: HashSet::new(),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            scan_tx,
            scan_rx,
            events_tx,
            events_rx,
            manager_events,
        }
    }

    /// Swap the port enumerator.
    pub fn with_enumerator(mut self, enumerator: Arc<dyn PortEnumerator>) -> Self {
        self.enumerator = enumerator;
        self
    }

    /// Swap the device factory.
    pub fn with_device_factory(mut self, factory: Box<dyn DeviceFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Swap the active machine profile provider.
    pub fn with_profile(mut self, profile: Box<dyn MachineProfileProvider>) -> Self {
        self.profile = profile;
        self
    }

    /// Swap the firmware store.
    pub fn with_firmware_store(mut self, store: Box<dyn FirmwareStore>) -> Self {
        self.firmware_store = store;
        self
    }

    /// Swap the output-device registry.
    pub fn with_registry(mut self, registry: Arc<dyn OutputDeviceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Swap the firmware progress surface.
    pub fn with_progress_surface(mut self, surface: Box<dyn ProgressSurface>) -> Self {
        self.progress_surface = surface;
        self
    }

    /// Subscribe to fleet-level notifications. Lagging or dropped
    /// subscribers never fail the manager.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.manager_events.subscribe()
    }

    /// The registry this manager publishes connected devices into.
    pub fn registry(&self) -> Arc<dyn OutputDeviceRegistry> {
        self.registry.clone()
    }

    /// Start the discovery worker. A no-op while one is already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let enumerator = self.enumerator.clone();
        let scan_tx = self.scan_tx.clone();
        let interval = self.config.poll_interval();

        self.worker = Some(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let ports = enumerator.scan().await;
                tracing::trace!(count = ports.len(), "scan cycle complete");
                match scan_tx.try_send(ports) {
                    Ok(()) => {}
                    // Owner has not drained the previous scan; the next
                    // cycle supersedes this one.
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
                tokio::time::sleep(interval).await;
            }
            tracing::debug!("discovery worker stopped");
        }));
    }

    /// Stop the discovery worker and wait for it to exit. Tolerates
    /// never having been started. Cancellation is cooperative and
    /// checked once per poll cycle, so shutdown can take up to one poll
    /// interval.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if let Err(error) = worker.await {
                tracing::warn!(%error, "discovery worker exited abnormally");
            }
        }
    }

    /// Drain pending scan results and device notifications. Must run on
    /// the owner context; all device construction and mutation happens
    /// here.
    pub async fn tick(&mut self) {
        while let Ok(ports) = self.scan_rx.try_recv() {
            self.apply_scan(ports).await;
        }
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    /// Drive the owner context until [stop][Self::stop] clears the
    /// running flag (call [start][Self::start] first).
    pub async fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                Some(ports) = self.scan_rx.recv() => self.apply_scan(ports).await,
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }

    /// Apply one full scan result: construct devices for ports that are
    /// new since the last cycle, replace the known set wholesale, and
    /// drop devices whose port disappeared.
    ///
    /// A port that vanishes and reappears within one cycle is invisible
    /// here; a cycle boundary only ever produces a single add or a
    /// single remove per port, never a spurious pair.
    pub async fn apply_scan(&mut self, ports: Vec<String>) {
        for port in &ports {
            if !self.known_ports.contains(port) {
                self.add_device(port).await;
            }
        }

        self.known_ports = ports.into_iter().collect();

        let stale: Vec<String> = self
            .devices
            .keys()
            .filter(|port| !self.known_ports.contains(*port))
            .cloned()
            .collect();
        for port in stale {
            self.remove_device(&port).await;
        }
    }

    async fn add_device(&mut self, port: &str) {
        tracing::info!(port, "new printer port discovered");
        let mut device = self.factory.build(port, self.events_tx.clone());
        if let Err(error) = device.connect().await {
            // The device stays tracked; the port may come good on a
            // later reconnect.
            tracing::warn!(port, %error, "could not connect to printer");
        }
        self.devices.insert(port.to_string(), device);
        let _ = self.manager_events.send(ManagerEvent::ConnectionStateChanged);
    }

    async fn remove_device(&mut self, port: &str) {
        let Some(mut device) = self.devices.remove(port) else {
            return;
        };
        tracing::info!(port, "printer port disappeared, closing device");
        if let Err(error) = device.close().await {
            tracing::warn!(port, %error, "device close failed");
        }
        self.unpublish(port);
        let _ = self.manager_events.send(ManagerEvent::ConnectionStateChanged);
    }

    fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::ConnectionState { device, state } => {
                // The device may have been removed while this event was
                // in flight; that is not an error.
                if !self.devices.contains_key(&device) {
                    return;
                }
                if state == ConnectionState::Connected {
                    self.publish(&device);
                } else {
                    self.unpublish(&device);
                }
                let _ = self.manager_events.send(ManagerEvent::ConnectionStateChanged);
            }
            DeviceEvent::Progress { .. } => {
                let _ = self.manager_events.send(ManagerEvent::Progress(self.progress()));
            }
            _ => {}
        }
    }

    fn publish(&mut self, port: &str) {
        if !self.published.insert(port.to_string()) {
            return;
        }
        self.registry.add_output_device(OutputDeviceHandle {
            id: port.to_string(),
            name: port.to_string(),
        });
    }

    fn unpublish(&mut self, port: &str) {
        if !self.published.remove(port) {
            return;
        }
        self.registry.remove_output_device(port);
    }

    /// Mean progress across all tracked devices; 0 when none are
    /// tracked. An idle device (no active operation) counts as 0 so the
    /// mean stays in [0, 100].
    pub fn progress(&self) -> f64 {
        if self.devices.is_empty() {
            return 0.0;
        }
        self.devices.values().map(|d| d.progress().max(0.0)).sum::<f64>() / self.devices.len() as f64
    }

    /// The set of ports seen by the most recently applied scan.
    pub fn known_ports(&self) -> &HashSet<String> {
        &self.known_ports
    }

    /// Ports of all currently tracked devices.
    pub fn tracked_ports(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Borrow a tracked device.
    pub fn device(&self, port: &str) -> Option<&PrinterOutputDevice> {
        self.devices.get(port)
    }

    /// Mutably borrow a tracked device. Owner context only; this is the
    /// entry point for protocol-side updates (temperatures, head
    /// position, progress).
    pub fn device_mut(&mut self, port: &str) -> Option<&mut PrinterOutputDevice> {
        self.devices.get_mut(port)
    }

    /// The currently connected devices as (name, handle) pairs.
    pub fn connected_devices(&self) -> Vec<(String, &PrinterOutputDevice)> {
        self.devices
            .iter()
            .filter(|(_, device)| device.connection_state() == ConnectionState::Connected)
            .map(|(port, device)| (port.clone(), device))
            .collect()
    }

    /// Flash firmware on every tracked device.
    ///
    /// The image is resolved once per batch from the active machine
    /// profile; all devices in one batch are assumed to be the same
    /// logical machine type. A machine id with no known image fails the
    /// whole batch. A per-device flash failure marks that device's
    /// progress as failed and the batch continues with the next device.
    /// The progress surface is left open when the batch finishes,
    /// failures included; only the single-port path closes it on error.
    pub async fn update_all_firmware(&mut self) -> Result<(), FirmwareError> {
        if self.devices.is_empty() {
            self.notify_user("Cannot update firmware, there were no connected printers found.");
            return Ok(());
        }

        self.progress_surface.show();

        let image = match resolve_image(&self.profile.machine_id(), self.profile.heated_bed_enabled()) {
            Ok(image) => image,
            Err(error) => {
                self.notify_user(&format!("Cannot update firmware: {}.", error));
                return Err(error);
            }
        };

        let ports = self.tracked_ports();
        for port in ports {
            if let Err(error) = self.flash_device(&port, &image).await {
                tracing::warn!(port, %error, "no firmware flashed for printer");
                if let Some(device) = self.devices.get_mut(&port) {
                    device.set_progress(PROGRESS_FAILED);
                }
            }
        }
        Ok(())
    }

    /// Flash firmware on the single device at `port`. Unlike the batch
    /// path there is nothing to continue to: resolution or flash
    /// failure closes the progress surface and is returned to the
    /// caller.
    pub async fn update_firmware_by_serial(&mut self, port: &str) -> Result<(), FirmwareError> {
        if !self.devices.contains_key(port) {
            return Err(FirmwareError::UnknownPort(port.to_string()));
        }

        self.progress_surface.show();

        let result = match resolve_image(&self.profile.machine_id(), self.profile.heated_bed_enabled()) {
            Ok(image) => self.flash_device(port, &image).await,
            Err(error) => Err(error),
        };

        if let Err(error) = &result {
            self.progress_surface.close();
            tracing::error!(port, %error, "could not update firmware for printer");
        }
        result
    }

    async fn flash_device(&mut self, port: &str, image: &str) -> Result<(), FirmwareError> {
        let path = self.firmware_store.resolve(FIRMWARE_CATEGORY, image)?;
        let device = self
            .devices
            .get_mut(port)
            .ok_or_else(|| FirmwareError::UnknownPort(port.to_string()))?;
        device.update_firmware(&path).await
    }

    fn notify_user(&mut self, message: &str) {
        tracing::warn!("{}", message);
        let _ = self.manager_events.send(ManagerEvent::UserMessage(message.to_string()));
    }
}
