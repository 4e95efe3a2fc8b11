//! Per-hand haptic channel
//!
//! A channel owns the device binding for one role, the decaying vibration
//! request, and the pulse loop. The loop runs exactly while the bound
//! device needs emulation.
//!
//! Presence callbacks, vibration requests and loop ticks may arrive on
//! different runtime threads, so all channel state sits behind one mutex.
//! A tick decides and sends its pulse while holding it; once a disconnect
//! has been processed no further pulse can go out.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;

use crate::binding::{BindOutcome, DeviceBinding, StartupSelection};
use crate::config::EmulationConfig;
use crate::device::{DeviceDescriptor, Role};
use crate::host::PulseOutput;
use crate::pulse::{PulseLoop, VibrationState, PULSE_CHANNEL, TICK_PERIOD, TICK_PERIOD_SECS};

/// Mutable channel state
struct ChannelState {
    binding: DeviceBinding,
    vibration: VibrationState,
    settings: EmulationConfig,
    /// Present iff the bound device requires emulation
    pulse_loop: Option<PulseLoop>,
}

/// Point-in-time view of a channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub role: Role,
    pub bound_device: Option<DeviceDescriptor>,
    pub requires_emulation: bool,
    pub remaining_time: f32,
    pub pending_amplitude: f32,
    pub loop_active: bool,
}

/// Haptic emulation state machine for one hand
pub struct HapticChannel {
    role: Role,
    state: Arc<Mutex<ChannelState>>,
    output: Arc<dyn PulseOutput>,
    runtime: Handle,
}

fn lock(state: &Mutex<ChannelState>) -> MutexGuard<'_, ChannelState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HapticChannel {
    /// Create an unbound channel; pulse loops are spawned on `runtime`
    pub fn new(role: Role, settings: EmulationConfig, output: Arc<dyn PulseOutput>, runtime: Handle) -> Self {
        Self {
            role,
            state: Arc::new(Mutex::new(ChannelState {
                binding: DeviceBinding::new(role),
                vibration: VibrationState::default(),
                settings,
                pulse_loop: None,
            })),
            output,
            runtime,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    // =========================================================================
    // Device presence
    // =========================================================================

    /// Handle a device connect event
    pub fn on_device_connected(&self, device: &DeviceDescriptor) {
        let mut state = lock(&self.state);
        let settings = state.settings.clone();

        match state.binding.on_connected(device, &settings) {
            BindOutcome::Ignored => {
                tracing::trace!(role = %self.role, device = %device.id, name = %device.name, "Device does not match role");
            }
            BindOutcome::Bound { requires_emulation, replaced } => {
                tracing::debug!(
                    role = %self.role,
                    device = %device.id,
                    manufacturer = %device.manufacturer,
                    name = %device.name,
                    characteristics = %device.characteristics,
                    serial = %device.serial,
                    requires_emulation,
                    "Device found"
                );

                if let Some(previous) = replaced {
                    tracing::warn!(
                        role = %self.role,
                        previous = %previous.id,
                        device = %device.id,
                        "Another controller took over this role"
                    );
                    Self::stop_loop(&mut state);
                }

                self.sync_loop(&mut state);
            }
        }
    }

    /// Handle a device disconnect event
    ///
    /// Ignored unless `device` is the bound device.
    pub fn on_device_disconnected(&self, device: &DeviceDescriptor) {
        let mut state = lock(&self.state);

        if !state.binding.on_disconnected(device) {
            tracing::trace!(role = %self.role, device = %device.id, "Ignoring disconnect of unbound device");
            return;
        }

        Self::stop_loop(&mut state);
        if state.settings.clear_on_disconnect {
            state.vibration.clear();
        }

        tracing::debug!(
            role = %self.role,
            device = %device.id,
            manufacturer = %device.manufacturer,
            name = %device.name,
            characteristics = %device.characteristics,
            "Device lost"
        );
    }

    /// Bind from a synchronous enumeration of connected devices
    ///
    /// Several qualifying devices is ambiguous; nothing is bound until a
    /// connect event arrives or a disconnect leaves a single candidate.
    pub fn reconcile(&self, devices: &[DeviceDescriptor]) {
        match DeviceBinding::select_startup(self.role, devices) {
            StartupSelection::Single(device) => self.on_device_connected(device),
            StartupSelection::Ambiguous(count) => {
                tracing::warn!(role = %self.role, count, "Multiple controllers match role, waiting for a connect event");
            }
            StartupSelection::None => {
                tracing::debug!(role = %self.role, "No controller connected for role");
            }
        }
    }

    /// Re-derive the binding after presence events were lost
    pub fn resync(&self, devices: &[DeviceDescriptor]) {
        let stale = {
            let state = lock(&self.state);
            state
                .binding
                .bound_device()
                .filter(|bound| !devices.iter().any(|d| d.id == bound.id))
                .cloned()
        };

        if let Some(device) = stale {
            self.on_device_disconnected(&device);
        }

        if !self.is_bound() {
            self.reconcile(devices);
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Record a continuous vibration request
    ///
    /// Never touches the device; the next loop tick picks it up. Returns
    /// whether the request was accepted.
    pub fn request_vibration(&self, amplitude: f32, duration_secs: f32) -> bool {
        let mut state = lock(&self.state);
        let accepted = state.vibration.request(amplitude, duration_secs);

        tracing::trace!(
            role = %self.role,
            amplitude,
            duration_secs,
            accepted,
            remaining_time = state.vibration.remaining_time(),
            "Vibration requested"
        );

        accepted
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.state).binding.bound_device().is_some()
    }

    /// Whether requests for this hand are being emulated
    pub fn is_emulation_active(&self) -> bool {
        lock(&self.state).binding.requires_emulation()
    }

    /// Apply new settings, re-evaluating the bound device
    pub fn apply_settings(&self, settings: EmulationConfig) {
        let mut state = lock(&self.state);
        state.binding.reevaluate(&settings);
        state.settings = settings;
        self.sync_loop(&mut state);
    }

    /// Drop the binding and cancel the loop
    pub fn shutdown(&self) {
        let mut state = lock(&self.state);
        Self::stop_loop(&mut state);
        state.binding.clear();
        state.vibration.clear();
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let state = lock(&self.state);
        ChannelSnapshot {
            role: self.role,
            bound_device: state.binding.bound_device().cloned(),
            requires_emulation: state.binding.requires_emulation(),
            remaining_time: state.vibration.remaining_time(),
            pending_amplitude: state.vibration.pending_amplitude(),
            loop_active: state.pulse_loop.is_some(),
        }
    }

    // =========================================================================
    // Pulse loop
    // =========================================================================

    /// Start or stop the loop to match the emulation verdict
    fn sync_loop(&self, state: &mut ChannelState) {
        let requires_emulation = state.binding.requires_emulation();

        if !requires_emulation {
            Self::stop_loop(state);
            return;
        }

        if state.pulse_loop.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.state);
        let output = self.output.clone();
        state.pulse_loop = Some(PulseLoop::spawn(&self.runtime, TICK_PERIOD, move || {
            Self::tick(&weak, output.as_ref());
        }));

        tracing::debug!(role = %self.role, "Haptic emulation loop started");
    }

    fn stop_loop(state: &mut ChannelState) {
        if let Some(pulse_loop) = state.pulse_loop.take() {
            pulse_loop.stop();
            tracing::debug!(role = %state.binding.role(), "Haptic emulation loop stopped");
        }
    }

    /// One loop iteration: decay, then pulse if time is left
    fn tick(state: &Weak<Mutex<ChannelState>>, output: &dyn PulseOutput) {
        let Some(state) = state.upgrade() else {
            return;
        };
        let mut state = lock(&state);

        let Some(amplitude) = state.vibration.advance(TICK_PERIOD_SECS) else {
            return;
        };
        let Some(device) = state.binding.bound_device().map(|d| d.id) else {
            return;
        };

        if let Err(e) = output.send_pulse(device, PULSE_CHANNEL, amplitude) {
            tracing::trace!(device = %device, error = %e, "Pulse dropped");
        }
    }
}

impl Drop for HapticChannel {
    fn drop(&mut self) {
        Self::stop_loop(&mut lock(&self.state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Characteristics, DeviceId};
    use crate::host::DeviceRegistry;
    use crate::mock_host::MockHost;
    use std::time::Duration;

    fn channel(host: &Arc<MockHost>, role: Role) -> HapticChannel {
        HapticChannel::new(role, EmulationConfig::default(), host.clone(), Handle::current())
    }

    #[tokio::test(start_paused = true)]
    async fn test_knuckles_connect_starts_loop_once() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let device = host.connect_controller(Role::Left, "KNUCKLES left", "Valve", "LHR-1");

        channel.on_device_connected(&device);
        let snapshot = channel.snapshot();
        assert!(snapshot.requires_emulation);
        assert!(snapshot.loop_active);
        assert!(channel.is_emulation_active());

        // Ticks at 0 and 12.5ms
        channel.request_vibration(0.5, 10.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(host.pulse_count(device.id), 2);

        // A repeated connect for the same device must not add a second loop:
        // one more window of 24ms holds exactly two more ticks
        channel.on_device_connected(&device);
        assert!(channel.snapshot().loop_active);
        tokio::time::sleep(Duration::from_millis(24)).await;
        assert_eq!(host.pulse_count(device.id), 4);
    }

    #[tokio::test]
    async fn test_non_target_controller_passes_through() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Right);
        let device = host.connect_controller(Role::Right, "Vive Controller", "HTC", "VC-1");

        channel.on_device_connected(&device);
        let snapshot = channel.snapshot();
        assert_eq!(snapshot.bound_device, Some(device));
        assert!(!snapshot.requires_emulation);
        assert!(!snapshot.loop_active);
    }

    #[tokio::test]
    async fn test_wrong_side_is_ignored() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Right);
        let device = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");

        channel.on_device_connected(&device);
        assert!(channel.snapshot().bound_device.is_none());
    }

    #[tokio::test]
    async fn test_stale_disconnect_leaves_state_unchanged() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let device = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");
        channel.on_device_connected(&device);
        channel.request_vibration(0.3, 0.5);
        let before = channel.snapshot();

        let mut other = device.clone();
        other.id = DeviceId(999);
        channel.on_device_disconnected(&other);

        assert_eq!(channel.snapshot(), before);
    }

    #[tokio::test]
    async fn test_disconnect_stops_loop_and_clears_request() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let device = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");
        channel.on_device_connected(&device);
        channel.request_vibration(0.3, 5.0);

        channel.on_device_disconnected(&device);
        let snapshot = channel.snapshot();
        assert!(snapshot.bound_device.is_none());
        assert!(!snapshot.requires_emulation);
        assert!(!snapshot.loop_active);
        assert_eq!(snapshot.remaining_time, 0.0);

        // Idempotent
        channel.on_device_disconnected(&device);
    }

    #[tokio::test]
    async fn test_disconnect_can_keep_request() {
        let host = Arc::new(MockHost::new());
        let settings = EmulationConfig { clear_on_disconnect: false, ..EmulationConfig::default() };
        let channel = HapticChannel::new(Role::Left, settings, host.clone(), Handle::current());
        let device = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");
        channel.on_device_connected(&device);
        channel.request_vibration(0.3, 5.0);

        channel.on_device_disconnected(&device);
        assert_eq!(channel.snapshot().remaining_time, 10.0);
    }

    #[tokio::test]
    async fn test_request_exact_scaling() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);

        assert!(channel.request_vibration(0.5, 1.0));
        let snapshot = channel.snapshot();
        assert_eq!(snapshot.remaining_time, 2.0);
        assert_eq!(snapshot.pending_amplitude, 1.0);

        // Below threshold: untouched
        assert!(!channel.request_vibration(0.003, 1.0));
        assert_eq!(channel.snapshot(), snapshot);

        // Smaller request overwrites, no blending
        assert!(channel.request_vibration(0.1, 0.25));
        let snapshot = channel.snapshot();
        assert_eq!(snapshot.remaining_time, 0.5);
        assert!((snapshot.pending_amplitude - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_under_qualified_device_does_not_bind() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let mut device = DeviceDescriptor::controller(host.allocate_id(), Role::Left, "Knuckles Left", "Valve", "LHR-1");
        device.characteristics = Characteristics::CONTROLLER | Characteristics::LEFT;

        channel.on_device_connected(&device);
        assert!(channel.snapshot().bound_device.is_none());
        assert!(!channel.snapshot().loop_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulses_follow_request() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Right);
        let device = host.connect_controller(Role::Right, "Knuckles Right", "Valve", "RHR-1");
        channel.on_device_connected(&device);

        // 0.02s scaled to 0.04s: 0.0275, 0.015, 0.0025 then silence
        channel.request_vibration(0.4, 0.02);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let pulses = host.pulses();
        assert_eq!(pulses.len(), 3);
        assert!(pulses.iter().all(|p| p.device == device.id && p.channel == 0));
        assert!(pulses.iter().all(|p| (p.amplitude - 0.8).abs() < 1e-6));
        assert_eq!(channel.snapshot().remaining_time, 0.0);
        assert!(channel.snapshot().loop_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pulses_after_disconnect() {
        let host = Arc::new(MockHost::new());
        let settings = EmulationConfig { clear_on_disconnect: false, ..EmulationConfig::default() };
        let channel = HapticChannel::new(Role::Left, settings, host.clone(), Handle::current());
        let device = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");
        channel.on_device_connected(&device);

        channel.request_vibration(0.5, 10.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = host.pulse_count(device.id);
        assert!(sent > 0);

        // Keep the device reachable so only the channel can prevent pulses
        channel.on_device_disconnected(&device);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(host.pulse_count(device.id), sent);
        assert!(channel.snapshot().remaining_time > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_device_is_best_effort() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let device = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");
        channel.on_device_connected(&device);
        host.set_available(device.id, false);

        channel.request_vibration(0.5, 0.05);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(host.pulse_count(device.id), 0);

        // Loop survives the failures
        host.set_available(device.id, true);
        channel.request_vibration(0.5, 0.05);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(host.pulse_count(device.id) > 0);
        assert!(channel.snapshot().loop_active);
    }

    #[tokio::test]
    async fn test_reconcile_single_and_ambiguous() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let first = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");

        channel.reconcile(&host.list_devices(Role::Left));
        assert_eq!(channel.snapshot().bound_device.map(|d| d.id), Some(first.id));

        let channel = self::channel(&host, Role::Left);
        host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-2");
        channel.reconcile(&host.list_devices(Role::Left));
        assert!(channel.snapshot().bound_device.is_none());
        assert!(!channel.snapshot().loop_active);
    }

    #[tokio::test]
    async fn test_resync_drops_vanished_device() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let first = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");
        channel.on_device_connected(&first);

        host.disconnect(first.id);
        let second = host.connect_controller(Role::Left, "Vive Controller", "HTC", "VC-1");

        channel.resync(&host.list_devices(Role::Left));
        let snapshot = channel.snapshot();
        assert_eq!(snapshot.bound_device.map(|d| d.id), Some(second.id));
        assert!(!snapshot.loop_active);
    }

    #[tokio::test]
    async fn test_apply_settings_toggles_loop() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let device = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");
        channel.on_device_connected(&device);
        assert!(channel.snapshot().loop_active);

        channel.apply_settings(EmulationConfig { enabled: false, ..EmulationConfig::default() });
        assert!(!channel.snapshot().loop_active);
        assert!(!channel.is_emulation_active());

        channel.apply_settings(EmulationConfig::default());
        assert!(channel.snapshot().loop_active);

        channel.apply_settings(EmulationConfig { marker: "vive".to_string(), ..EmulationConfig::default() });
        assert!(!channel.snapshot().loop_active);
    }

    #[tokio::test]
    async fn test_shutdown_resets_everything() {
        let host = Arc::new(MockHost::new());
        let channel = channel(&host, Role::Left);
        let device = host.connect_controller(Role::Left, "Knuckles Left", "Valve", "LHR-1");
        channel.on_device_connected(&device);
        channel.request_vibration(0.5, 1.0);

        channel.shutdown();
        let snapshot = channel.snapshot();
        assert!(snapshot.bound_device.is_none());
        assert!(!snapshot.loop_active);
        assert_eq!(snapshot.remaining_time, 0.0);

        channel.shutdown();
    }
}
