//! hapticfixd Library
//!
//! Public API for testing and integration.

pub mod binding;
pub mod channel;
pub mod config;
pub mod dbus;
pub mod device;
pub mod emulator;
pub mod host;
pub mod mock_host;
pub mod pulse;

/// Re-export commonly used types
pub use binding::{BindOutcome, DeviceBinding, StartupSelection};
pub use channel::{ChannelSnapshot, HapticChannel};
pub use config::{Config, ConfigError, EmulationConfig, MockDeviceConfig, SharedConfig, share_config};
pub use dbus::{init_dbus_service, HapticFixService, DBUS_INTERFACE, DBUS_NAME, DBUS_PATH};
pub use device::{Characteristics, DeviceDescriptor, DeviceId, Role, DEFAULT_EMULATION_MARKER};
pub use emulator::{EmulatorError, HapticControl, HapticEmulator, PulseRouting};
pub use host::{DeviceEvent, DeviceEvents, DeviceRegistry, Host, PulseError, PulseOutput};
pub use mock_host::{MockHost, PulseRecord};
pub use pulse::{PulseLoop, VibrationState, AMPLITUDE_THRESHOLD, PULSE_CHANNEL, TICK_PERIOD, TICK_PERIOD_SECS, TICK_RATE_HZ, VIBRATION_GAIN};
