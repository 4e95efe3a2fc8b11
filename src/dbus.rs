//! D-Bus IPC server for hapticfixd
//!
//! Exposes the emulator to the process that intercepts native haptic calls.
//!
//! ## Interface: org.hapticfix.Emulator
//!
//! ### Methods:
//! - `RequestVibration(role: s, amplitude: d, duration: d)` - Queue a continuous vibration
//! - `IsEmulationActive(role: s) -> b` - Whether the hand's controller is emulated
//! - `TriggerHapticPulse(role: s, duration: d, strength: d, frequency: d) -> b` -
//!   Route a native haptic call; `false` means the caller should run it natively
//! - `ReloadConfig()` - Re-read config.json and apply emulation settings

use std::sync::Arc;
use zbus::{fdo, interface};

use crate::config::{Config, SharedConfig};
use crate::device::Role;
use crate::emulator::{HapticControl, PulseRouting};

/// D-Bus interface name
pub const DBUS_INTERFACE: &str = "org.hapticfix.Emulator";

/// D-Bus object path
pub const DBUS_PATH: &str = "/org/hapticfix/Emulator";

/// D-Bus bus name
pub const DBUS_NAME: &str = "org.hapticfix.Emulator";

/// hapticfixd D-Bus service
pub struct HapticFixService {
    /// Daemon version
    version: String,
    /// Shared configuration for reload
    config: SharedConfig,
    emulator: Arc<dyn HapticControl>,
}

impl HapticFixService {
    pub fn new(config: SharedConfig, emulator: Arc<dyn HapticControl>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            emulator,
        }
    }
}

fn parse_role(role: &str) -> fdo::Result<Role> {
    role.parse::<Role>()
        .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))
}

#[interface(name = "org.hapticfix.Emulator")]
impl HapticFixService {
    /// Record a continuous vibration request for one hand
    ///
    /// # Arguments
    /// * `role` - "left" or "right"
    /// * `amplitude` - Strength, 0.0 to 1.0
    /// * `duration` - Length in seconds
    async fn request_vibration(&self, role: &str, amplitude: f64, duration: f64) -> fdo::Result<()> {
        let role = parse_role(role)?;
        let accepted = self.emulator.request_vibration(role, amplitude as f32, duration as f32);
        tracing::trace!(role = %role, amplitude, duration, accepted, "RequestVibration called");
        Ok(())
    }

    /// Whether pulse emulation handles this hand
    async fn is_emulation_active(&self, role: &str) -> fdo::Result<bool> {
        let role = parse_role(role)?;
        Ok(self.emulator.is_emulation_active(role))
    }

    /// Route a native haptic pulse call
    ///
    /// Returns true if the call was taken over by emulation.
    async fn trigger_haptic_pulse(
        &self,
        role: &str,
        duration: f64,
        strength: f64,
        frequency: f64,
    ) -> fdo::Result<bool> {
        let role = parse_role(role)?;
        let routing = self.emulator.route_haptic_pulse(
            role,
            duration as f32,
            strength as f32,
            frequency as f32,
        );
        Ok(routing == PulseRouting::Emulated)
    }

    /// Reload configuration from disk
    ///
    /// Emulation settings take effect immediately. Mock devices only
    /// apply at the next daemon start.
    async fn reload_config(&self) -> fdo::Result<()> {
        tracing::info!("ReloadConfig called - reloading configuration from disk");

        let path = self
            .config
            .read()
            .map_err(|e| fdo::Error::Failed(format!("Lock error: {}", e)))?
            .config_path
            .clone();

        let loaded = match path {
            Some(path) => Config::load(path),
            None => Config::load_default(),
        };

        match loaded {
            Ok(new_config) => {
                self.emulator.apply_settings(&new_config.emulation);

                match self.config.write() {
                    Ok(mut config) => {
                        *config = new_config;
                        tracing::info!("Configuration reloaded successfully");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to acquire config write lock");
                        Err(fdo::Error::Failed(format!("Lock error: {}", e)))
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload configuration");
                Err(fdo::Error::Failed(format!("Config reload failed: {}", e)))
            }
        }
    }

    /// Get daemon version
    #[zbus(property)]
    async fn daemon_version(&self) -> &str {
        &self.version
    }
}

/// Initialize and run the D-Bus service
///
/// Connects to the session bus, registers the service name, and exports
/// the interface at [`DBUS_PATH`].
///
/// # Returns
/// A `zbus::Connection` that should be kept alive for the service to run.
pub async fn init_dbus_service(
    config: SharedConfig,
    emulator: Arc<dyn HapticControl>,
) -> zbus::Result<zbus::Connection> {
    let service = HapticFixService::new(config, emulator);

    let connection = zbus::connection::Builder::session()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, service)?
        .build()
        .await?;

    tracing::info!(
        name = DBUS_NAME,
        path = DBUS_PATH,
        "D-Bus service registered"
    );

    Ok(connection)
}
