//! Haptic emulation subsystem
//!
//! Owns one [`HapticChannel`] per hand and wires them to the host: an
//! initial device scan on start, then a task forwarding presence events to
//! both channels until stop.
//!
//! The caller that would normally issue a native continuous-vibration
//! command asks [`HapticEmulator::route_haptic_pulse`] first. Controllers
//! that need emulation are handled here; everything else passes through.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::channel::{ChannelSnapshot, HapticChannel};
use crate::config::EmulationConfig;
use crate::device::Role;
use crate::host::{DeviceEvent, Host};

/// Where a native haptic call should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseRouting {
    /// Handled by pulse emulation; skip the native call
    Emulated,
    /// Not an emulated controller; run the native call unchanged
    PassThrough,
}

/// Type-erased control surface for IPC front ends
pub trait HapticControl: Send + Sync {
    fn request_vibration(&self, role: Role, amplitude: f32, duration_secs: f32) -> bool;
    fn is_emulation_active(&self, role: Role) -> bool;
    fn route_haptic_pulse(&self, role: Role, duration_secs: f32, strength: f32, frequency: f32) -> PulseRouting;
    fn apply_settings(&self, settings: &EmulationConfig);
}

/// Live presence event subscription
///
/// Aborts the forwarding task when dropped.
struct EventSubscription {
    task: JoinHandle<()>,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Left and right haptic channels plus their host wiring
pub struct HapticEmulator<H: Host> {
    host: Arc<H>,
    left: Arc<HapticChannel>,
    right: Arc<HapticChannel>,
    runtime: Handle,
    subscription: Mutex<Option<EventSubscription>>,
}

impl<H: Host> HapticEmulator<H> {
    /// Create both channels
    ///
    /// Must be called from within a Tokio runtime; pulse loops and the
    /// event task are spawned on it.
    pub fn new(host: Arc<H>, settings: EmulationConfig) -> Result<Self, EmulatorError> {
        let runtime = Handle::try_current().map_err(|_| EmulatorError::NoRuntime)?;

        let left = Arc::new(HapticChannel::new(Role::Left, settings.clone(), host.clone(), runtime.clone()));
        let right = Arc::new(HapticChannel::new(Role::Right, settings, host.clone(), runtime.clone()));

        tracing::info!("Haptic emulator initialized");

        Ok(Self {
            host,
            left,
            right,
            runtime,
            subscription: Mutex::new(None),
        })
    }

    /// Subscribe to presence events and bind already connected devices
    pub fn start(&self) -> Result<(), EmulatorError> {
        let mut subscription = self.lock_subscription();
        if subscription.is_some() {
            return Err(EmulatorError::AlreadyRunning);
        }

        // Subscribe before scanning so no connect falls in between
        let receiver = self.host.subscribe();

        for channel in self.channels() {
            channel.reconcile(&self.host.list_devices(channel.role()));
        }

        let task = self.runtime.spawn(forward_events(
            receiver,
            self.host.clone(),
            self.left.clone(),
            self.right.clone(),
        ));
        *subscription = Some(EventSubscription { task });

        tracing::info!(
            left_emulated = self.left.is_emulation_active(),
            right_emulated = self.right.is_emulation_active(),
            "Haptic emulator started"
        );
        Ok(())
    }

    /// Release the event subscription and cancel both loops
    ///
    /// Safe to call when not running.
    pub fn stop(&self) {
        let subscription = self.lock_subscription().take();
        let was_running = subscription.is_some();
        drop(subscription);

        for channel in self.channels() {
            channel.shutdown();
        }

        if was_running {
            tracing::info!("Haptic emulator stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_subscription().is_some()
    }

    /// Continuous vibration request for one hand
    pub fn request_vibration(&self, role: Role, amplitude: f32, duration_secs: f32) -> bool {
        self.channel(role).request_vibration(amplitude, duration_secs)
    }

    /// Whether one hand's controller is being emulated
    pub fn is_emulation_active(&self, role: Role) -> bool {
        self.channel(role).is_emulation_active()
    }

    /// Decide where a native haptic pulse call goes
    ///
    /// Emulated controllers record the request and the native call must be
    /// skipped. Frequency has no pulse equivalent and is ignored.
    pub fn route_haptic_pulse(&self, role: Role, duration_secs: f32, strength: f32, _frequency: f32) -> PulseRouting {
        let channel = self.channel(role);
        if !channel.is_emulation_active() {
            return PulseRouting::PassThrough;
        }

        channel.request_vibration(strength, duration_secs);
        PulseRouting::Emulated
    }

    /// Apply reloaded settings to both channels
    pub fn apply_settings(&self, settings: &EmulationConfig) {
        for channel in self.channels() {
            channel.apply_settings(settings.clone());
        }
        tracing::info!(
            enabled = settings.enabled,
            marker = %settings.marker,
            clear_on_disconnect = settings.clear_on_disconnect,
            "Emulation settings applied"
        );
    }

    pub fn snapshot(&self, role: Role) -> ChannelSnapshot {
        self.channel(role).snapshot()
    }

    pub fn channel(&self, role: Role) -> &HapticChannel {
        match role {
            Role::Left => self.left.as_ref(),
            Role::Right => self.right.as_ref(),
        }
    }

    fn channels(&self) -> [&HapticChannel; 2] {
        [self.left.as_ref(), self.right.as_ref()]
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<EventSubscription>> {
        self.subscription.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<H: Host> HapticControl for HapticEmulator<H> {
    fn request_vibration(&self, role: Role, amplitude: f32, duration_secs: f32) -> bool {
        HapticEmulator::request_vibration(self, role, amplitude, duration_secs)
    }

    fn is_emulation_active(&self, role: Role) -> bool {
        HapticEmulator::is_emulation_active(self, role)
    }

    fn route_haptic_pulse(&self, role: Role, duration_secs: f32, strength: f32, frequency: f32) -> PulseRouting {
        HapticEmulator::route_haptic_pulse(self, role, duration_secs, strength, frequency)
    }

    fn apply_settings(&self, settings: &EmulationConfig) {
        HapticEmulator::apply_settings(self, settings)
    }
}

impl<H: Host> Drop for HapticEmulator<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forward presence events to both channels until the source closes
async fn forward_events<H: Host>(
    receiver: broadcast::Receiver<DeviceEvent>,
    host: Arc<H>,
    left: Arc<HapticChannel>,
    right: Arc<HapticChannel>,
) {
    let channels = [left, right];
    let mut events = BroadcastStream::new(receiver);

    while let Some(event) = events.next().await {
        match event {
            Ok(DeviceEvent::Connected(device)) => {
                for channel in &channels {
                    channel.on_device_connected(&device);
                }
            }
            Ok(DeviceEvent::Disconnected(device)) => {
                for channel in &channels {
                    channel.on_device_disconnected(&device);

                    // An ambiguous scan may have become unambiguous
                    if !channel.is_bound() {
                        let mut remaining = host.list_devices(channel.role());
                        remaining.retain(|d| d.id != device.id);
                        channel.reconcile(&remaining);
                    }
                }
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Missed device events, rescanning");
                for channel in &channels {
                    channel.resync(&host.list_devices(channel.role()));
                }
            }
        }
    }

    tracing::debug!("Device event source closed");
}

// ============================================================================
// Error Types
// ============================================================================

/// Emulator lifecycle error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    /// Created outside a Tokio runtime
    NoRuntime,
    /// `start` called twice without `stop`
    AlreadyRunning,
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorError::NoRuntime => write!(f, "No Tokio runtime available"),
            EmulatorError::AlreadyRunning => write!(f, "Haptic emulator already running"),
        }
    }
}

impl std::error::Error for EmulatorError {}
