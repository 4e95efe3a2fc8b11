//! In-memory host runtime
//!
//! Stands in for the XR runtime: keeps a table of connected devices,
//! broadcasts presence changes, and records every pulse it is asked to
//! send. Used by the daemon when no real runtime is attached and by tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::config::MockDeviceConfig;
use crate::device::{DeviceDescriptor, DeviceId, Role};
use crate::host::{DeviceEvent, DeviceEvents, DeviceRegistry, PulseError, PulseOutput};

/// Presence event buffer size
const EVENT_CAPACITY: usize = 64;

/// A pulse delivered through the mock host
#[derive(Debug, Clone, PartialEq)]
pub struct PulseRecord {
    pub device: DeviceId,
    pub channel: u32,
    pub amplitude: f32,
}

/// Mock XR runtime
pub struct MockHost {
    devices: Mutex<Vec<DeviceDescriptor>>,
    unavailable: Mutex<HashSet<DeviceId>>,
    pulses: Mutex<Vec<PulseRecord>>,
    events: broadcast::Sender<DeviceEvent>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            devices: Mutex::new(Vec::new()),
            unavailable: Mutex::new(HashSet::new()),
            pulses: Mutex::new(Vec::new()),
            events,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a host with the configured controllers already connected
    pub fn from_config(devices: &[MockDeviceConfig]) -> Self {
        let host = Self::new();
        for device in devices {
            host.connect_controller(device.role, &device.name, &device.manufacturer, &device.serial);
        }
        host
    }

    /// Allocate a fresh device handle
    pub fn allocate_id(&self) -> DeviceId {
        DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Connect a fully qualifying hand controller
    pub fn connect_controller(&self, role: Role, name: &str, manufacturer: &str, serial: &str) -> DeviceDescriptor {
        let device = DeviceDescriptor::controller(self.allocate_id(), role, name, manufacturer, serial);
        self.connect(device.clone());
        device
    }

    /// Add a device and broadcast its connection
    pub fn connect(&self, device: DeviceDescriptor) {
        {
            let mut devices = lock(&self.devices);
            devices.retain(|d| d.id != device.id);
            devices.push(device.clone());
        }
        lock(&self.unavailable).remove(&device.id);

        tracing::debug!(device = %device.id, name = %device.name, "Mock device connected");
        // No subscribers is fine
        let _ = self.events.send(DeviceEvent::Connected(device));
    }

    /// Remove a device and broadcast its disconnection
    pub fn disconnect(&self, id: DeviceId) -> Option<DeviceDescriptor> {
        let removed = {
            let mut devices = lock(&self.devices);
            let index = devices.iter().position(|d| d.id == id)?;
            devices.remove(index)
        };

        tracing::debug!(device = %removed.id, name = %removed.name, "Mock device disconnected");
        let _ = self.events.send(DeviceEvent::Disconnected(removed.clone()));
        Some(removed)
    }

    /// Broadcast an arbitrary event without touching the device table
    pub fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    /// Make pulses to a device fail without a disconnect event
    pub fn set_available(&self, id: DeviceId, available: bool) {
        let mut unavailable = lock(&self.unavailable);
        if available {
            unavailable.remove(&id);
        } else {
            unavailable.insert(id);
        }
    }

    /// All connected devices
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        lock(&self.devices).clone()
    }

    /// Every pulse delivered so far
    pub fn pulses(&self) -> Vec<PulseRecord> {
        lock(&self.pulses).clone()
    }

    /// Number of pulses delivered to one device
    pub fn pulse_count(&self, id: DeviceId) -> usize {
        lock(&self.pulses).iter().filter(|p| p.device == id).count()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry for MockHost {
    fn list_devices(&self, role: Role) -> Vec<DeviceDescriptor> {
        lock(&self.devices)
            .iter()
            .filter(|d| d.characteristics.contains(role.side()))
            .cloned()
            .collect()
    }
}

impl DeviceEvents for MockHost {
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

impl PulseOutput for MockHost {
    fn send_pulse(&self, device: DeviceId, channel: u32, amplitude: f32) -> Result<(), PulseError> {
        let connected = lock(&self.devices).iter().any(|d| d.id == device);
        if !connected || lock(&self.unavailable).contains(&device) {
            return Err(PulseError::DeviceUnavailable(device));
        }

        tracing::trace!(device = %device, channel, amplitude, "Pulse");
        lock(&self.pulses).push(PulseRecord {
            device,
            channel,
            amplitude,
        });
        Ok(())
    }
}
