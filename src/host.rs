//! Host runtime seams consumed by the emulator
//!
//! The emulator never talks to hardware or the XR runtime directly. It
//! enumerates devices, listens for presence changes, and fires pulses
//! through these traits.

use std::fmt;
use tokio::sync::broadcast;

use crate::device::{DeviceDescriptor, DeviceId, Role};

/// Device presence change delivered by the host
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected(DeviceDescriptor),
    Disconnected(DeviceDescriptor),
}

impl DeviceEvent {
    pub fn device(&self) -> &DeviceDescriptor {
        match self {
            DeviceEvent::Connected(d) | DeviceEvent::Disconnected(d) => d,
        }
    }
}

/// Synchronous device enumeration
pub trait DeviceRegistry {
    /// Devices currently connected at the given hand role
    fn list_devices(&self, role: Role) -> Vec<DeviceDescriptor>;
}

/// Device presence event source
pub trait DeviceEvents {
    /// Subscribe to presence changes from now on
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}

/// Discrete haptic pulse primitive
///
/// Fire-and-forget from the emulator's point of view; errors are
/// returned for diagnostics only and never retried.
pub trait PulseOutput: Send + Sync {
    fn send_pulse(&self, device: DeviceId, channel: u32, amplitude: f32) -> Result<(), PulseError>;
}

/// Everything the emulator needs from the host
pub trait Host: DeviceRegistry + DeviceEvents + PulseOutput + Send + Sync + 'static {}

impl<T> Host for T where T: DeviceRegistry + DeviceEvents + PulseOutput + Send + Sync + 'static {}

/// Pulse delivery error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PulseError {
    /// Device vanished without a disconnect event
    DeviceUnavailable(DeviceId),
    /// Driver-level failure
    Io(String),
}

impl fmt::Display for PulseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PulseError::DeviceUnavailable(id) => write!(f, "Device {} unavailable", id),
            PulseError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for PulseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_device_accessor() {
        let device = DeviceDescriptor::controller(DeviceId(3), Role::Right, "Knuckles Right", "Valve", "RHR-3");
        let connected = DeviceEvent::Connected(device.clone());
        let disconnected = DeviceEvent::Disconnected(device.clone());
        assert_eq!(connected.device(), &device);
        assert_eq!(disconnected.device(), &device);
    }

    #[test]
    fn test_pulse_error_display() {
        assert_eq!(PulseError::DeviceUnavailable(DeviceId(7)).to_string(), "Device #7 unavailable");
        assert!(PulseError::Io("EPIPE".into()).to_string().contains("EPIPE"));
    }
}
