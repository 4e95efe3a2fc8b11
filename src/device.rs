//! Controller device descriptors and role matching
//!
//! A device is described the way the XR runtime reports it: a validity flag,
//! a set of characteristic flags, and identity strings. A device is the
//! controller for a hand role when it is valid and carries every flag in
//! [`Role::required_characteristics`].
//!
//! SPDX-License-Identifier: GPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Name token identifying controllers that drop continuous vibration
pub const DEFAULT_EMULATION_MARKER: &str = "knuckles";

// ============================================================================
// Role
// ============================================================================

/// Hand-side role a haptic channel is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Left,
    Right,
}

impl Role {
    /// Both roles, left first
    pub const ALL: [Role; 2] = [Role::Left, Role::Right];

    /// Side flag matching this role
    pub fn side(self) -> Characteristics {
        match self {
            Role::Left => Characteristics::LEFT,
            Role::Right => Characteristics::RIGHT,
        }
    }

    /// Flags a device must carry to be this role's controller
    pub fn required_characteristics(self) -> Characteristics {
        Characteristics::CONTROLLER
            | Characteristics::TRACKED_DEVICE
            | Characteristics::HELD_IN_HAND
            | self.side()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Left => "left",
            Role::Right => "right",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "lefthand" | "left_hand" => Ok(Role::Left),
            "right" | "righthand" | "right_hand" => Ok(Role::Right),
            _ => Err(RoleParseError(s.to_string())),
        }
    }
}

/// Unknown role name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleParseError(pub String);

impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown controller role: {:?}", self.0)
    }
}

impl std::error::Error for RoleParseError {}

// ============================================================================
// Characteristics
// ============================================================================

/// Device characteristic flag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Characteristics(u32);

impl Characteristics {
    pub const NONE: Self = Self(0);
    pub const HEAD_MOUNTED: Self = Self(1 << 0);
    pub const CAMERA: Self = Self(1 << 1);
    pub const HELD_IN_HAND: Self = Self(1 << 2);
    pub const HAND_TRACKING: Self = Self(1 << 3);
    pub const EYE_TRACKING: Self = Self(1 << 4);
    pub const TRACKED_DEVICE: Self = Self(1 << 5);
    pub const CONTROLLER: Self = Self(1 << 6);
    pub const TRACKING_REFERENCE: Self = Self(1 << 7);
    pub const LEFT: Self = Self(1 << 8);
    pub const RIGHT: Self = Self(1 << 9);

    const NAMES: [(Characteristics, &'static str); 10] = [
        (Self::HEAD_MOUNTED, "HeadMounted"),
        (Self::CAMERA, "Camera"),
        (Self::HELD_IN_HAND, "HeldInHand"),
        (Self::HAND_TRACKING, "HandTracking"),
        (Self::EYE_TRACKING, "EyeTracking"),
        (Self::TRACKED_DEVICE, "TrackedDevice"),
        (Self::CONTROLLER, "Controller"),
        (Self::TRACKING_REFERENCE, "TrackingReference"),
        (Self::LEFT, "Left"),
        (Self::RIGHT, "Right"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if every flag of `other` is set in `self`
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Characteristics {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Characteristics {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Characteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }

        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Device descriptor
// ============================================================================

/// Opaque handle the host uses to address a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connected device as reported by the host
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Host handle, used for identity comparison
    pub id: DeviceId,
    /// Whether the host considers the descriptor usable
    pub is_valid: bool,
    pub characteristics: Characteristics,
    /// Display name (e.g. "Knuckles Left")
    pub name: String,
    pub manufacturer: String,
    pub serial: String,
}

impl DeviceDescriptor {
    /// Build a valid, fully qualifying hand controller for `role`
    pub fn controller(
        id: DeviceId,
        role: Role,
        name: impl Into<String>,
        manufacturer: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            id,
            is_valid: true,
            characteristics: role.required_characteristics(),
            name: name.into(),
            manufacturer: manufacturer.into(),
            serial: serial.into(),
        }
    }

    /// Whether this device is the controller for `role`
    pub fn qualifies_for(&self, role: Role) -> bool {
        self.is_valid && self.characteristics.contains(role.required_characteristics())
    }

    /// Case-insensitive substring test of the display name against `marker`
    pub fn matches_marker(&self, marker: &str) -> bool {
        self.name.to_lowercase().contains(&marker.to_lowercase())
    }
}
