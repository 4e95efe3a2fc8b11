//! Device binding for a single hand role
//!
//! Tracks which connected device is the controller for a role and whether
//! that controller is a model that needs pulse emulation. Pure state; the
//! channel decides what to do with the outcomes.

use crate::config::EmulationConfig;
use crate::device::{DeviceDescriptor, Role};

/// Result of feeding a connect event to the binding
#[derive(Debug, Clone, PartialEq)]
pub enum BindOutcome {
    /// Device does not qualify for this role
    Ignored,
    /// Device is now bound
    Bound {
        requires_emulation: bool,
        /// Previously bound device that was superseded
        replaced: Option<DeviceDescriptor>,
    },
}

/// Candidate chosen from a startup enumeration
#[derive(Debug, Clone, PartialEq)]
pub enum StartupSelection<'a> {
    None,
    Single(&'a DeviceDescriptor),
    /// More than one device qualifies; nothing is bound
    Ambiguous(usize),
}

/// Role-to-device binding
#[derive(Debug, Clone)]
pub struct DeviceBinding {
    role: Role,
    bound: Option<DeviceDescriptor>,
    requires_emulation: bool,
}

impl DeviceBinding {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            bound: None,
            requires_emulation: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn bound_device(&self) -> Option<&DeviceDescriptor> {
        self.bound.as_ref()
    }

    /// True iff a device is bound and it needs emulation
    pub fn requires_emulation(&self) -> bool {
        self.requires_emulation
    }

    /// Handle a connect event
    pub fn on_connected(&mut self, device: &DeviceDescriptor, settings: &EmulationConfig) -> BindOutcome {
        if !device.qualifies_for(self.role) {
            return BindOutcome::Ignored;
        }

        let replaced = self
            .bound
            .replace(device.clone())
            .filter(|previous| previous.id != device.id);
        self.requires_emulation = Self::evaluate(device, settings);

        BindOutcome::Bound {
            requires_emulation: self.requires_emulation,
            replaced,
        }
    }

    /// Handle a disconnect event
    ///
    /// Returns true if `device` was the bound device and has been released.
    /// Disconnects for any other device are ignored.
    pub fn on_disconnected(&mut self, device: &DeviceDescriptor) -> bool {
        match &self.bound {
            Some(bound) if bound.id == device.id => {
                self.bound = None;
                self.requires_emulation = false;
                true
            }
            _ => false,
        }
    }

    /// Recompute the emulation verdict after a settings change
    pub fn reevaluate(&mut self, settings: &EmulationConfig) -> bool {
        self.requires_emulation = match &self.bound {
            Some(device) => Self::evaluate(device, settings),
            None => false,
        };
        self.requires_emulation
    }

    /// Drop any binding
    pub fn clear(&mut self) {
        self.bound = None;
        self.requires_emulation = false;
    }

    /// Pick the device to bind from an enumeration snapshot
    pub fn select_startup<'a>(role: Role, devices: &'a [DeviceDescriptor]) -> StartupSelection<'a> {
        let mut qualifying = devices.iter().filter(|d| d.qualifies_for(role));
        let first = qualifying.next();
        let rest = qualifying.count();
        match (first, rest) {
            (None, _) => StartupSelection::None,
            (Some(device), 0) => StartupSelection::Single(device),
            (Some(_), rest) => StartupSelection::Ambiguous(rest + 1),
        }
    }

    fn evaluate(device: &DeviceDescriptor, settings: &EmulationConfig) -> bool {
        settings.enabled && device.matches_marker(&settings.marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Characteristics, DeviceId};

    fn device(id: u64, role: Role, name: &str) -> DeviceDescriptor {
        DeviceDescriptor::controller(DeviceId(id), role, name, "Valve", format!("SN-{}", id))
    }

    #[test]
    fn test_knuckles_binds_and_requires_emulation() {
        let mut binding = DeviceBinding::new(Role::Left);
        let outcome = binding.on_connected(&device(1, Role::Left, "Knuckles Left"), &EmulationConfig::default());

        assert_eq!(outcome, BindOutcome::Bound { requires_emulation: true, replaced: None });
        assert_eq!(binding.bound_device().map(|d| d.id), Some(DeviceId(1)));
        assert!(binding.requires_emulation());
    }

    #[test]
    fn test_other_controller_binds_without_emulation() {
        let mut binding = DeviceBinding::new(Role::Right);
        binding.on_connected(&device(2, Role::Right, "Vive Controller"), &EmulationConfig::default());

        assert!(binding.bound_device().is_some());
        assert!(!binding.requires_emulation());
    }

    #[test]
    fn test_under_qualified_device_never_binds() {
        let mut binding = DeviceBinding::new(Role::Left);
        let mut tracker = device(3, Role::Left, "Knuckles Left");
        tracker.characteristics = Characteristics::TRACKED_DEVICE | Characteristics::LEFT;

        assert_eq!(binding.on_connected(&tracker, &EmulationConfig::default()), BindOutcome::Ignored);
        assert!(binding.bound_device().is_none());
        assert!(!binding.requires_emulation());
    }

    #[test]
    fn test_stale_disconnect_is_ignored() {
        let mut binding = DeviceBinding::new(Role::Left);
        binding.on_connected(&device(1, Role::Left, "Knuckles Left"), &EmulationConfig::default());

        // Same capabilities, different device
        assert!(!binding.on_disconnected(&device(9, Role::Left, "Knuckles Left")));
        assert_eq!(binding.bound_device().map(|d| d.id), Some(DeviceId(1)));
        assert!(binding.requires_emulation());
    }

    #[test]
    fn test_matching_disconnect_releases() {
        let mut binding = DeviceBinding::new(Role::Left);
        let knuckles = device(1, Role::Left, "Knuckles Left");
        binding.on_connected(&knuckles, &EmulationConfig::default());

        assert!(binding.on_disconnected(&knuckles));
        assert!(binding.bound_device().is_none());
        assert!(!binding.requires_emulation());
        assert!(!binding.on_disconnected(&knuckles));
    }

    #[test]
    fn test_newer_device_replaces_binding() {
        let mut binding = DeviceBinding::new(Role::Left);
        let first = device(1, Role::Left, "Knuckles Left");
        binding.on_connected(&first, &EmulationConfig::default());

        let outcome = binding.on_connected(&device(2, Role::Left, "Vive Controller"), &EmulationConfig::default());
        assert_eq!(outcome, BindOutcome::Bound { requires_emulation: false, replaced: Some(first) });
    }

    #[test]
    fn test_reconnect_of_same_device_is_not_a_replacement() {
        let mut binding = DeviceBinding::new(Role::Left);
        let knuckles = device(1, Role::Left, "Knuckles Left");
        binding.on_connected(&knuckles, &EmulationConfig::default());

        let outcome = binding.on_connected(&knuckles, &EmulationConfig::default());
        assert_eq!(outcome, BindOutcome::Bound { requires_emulation: true, replaced: None });
    }

    #[test]
    fn test_disabled_settings_never_require_emulation() {
        let settings = EmulationConfig { enabled: false, ..EmulationConfig::default() };
        let mut binding = DeviceBinding::new(Role::Left);
        binding.on_connected(&device(1, Role::Left, "Knuckles Left"), &settings);

        assert!(binding.bound_device().is_some());
        assert!(!binding.requires_emulation());

        assert!(binding.reevaluate(&EmulationConfig::default()));
    }

    #[test]
    fn test_startup_selection() {
        let left = device(1, Role::Left, "Knuckles Left");
        let right = device(2, Role::Right, "Knuckles Right");
        let spare = device(3, Role::Left, "Knuckles Left");

        assert_eq!(DeviceBinding::select_startup(Role::Left, &[]), StartupSelection::None);
        assert_eq!(
            DeviceBinding::select_startup(Role::Left, &[left.clone(), right.clone()]),
            StartupSelection::Single(&left)
        );
        assert_eq!(
            DeviceBinding::select_startup(Role::Left, &[left, right, spare]),
            StartupSelection::Ambiguous(2)
        );
    }
}
