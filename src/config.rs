//! Configuration management for hapticfixd
//!
//! Handles loading, validation, and reload of the JSON configuration file.
//! Configuration is stored at `~/.config/hapticfixd/config.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::device::{Role, DEFAULT_EMULATION_MARKER};

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "hapticfixd";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Emulation Configuration
// ============================================================================

/// Pulse emulation settings shared by both channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulationConfig {
    /// Enable emulation (false = every device passes through)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Device name token identifying controllers that need emulation
    /// (case-insensitive substring match)
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Forget the in-flight vibration when the bound device disconnects
    #[serde(default = "default_true")]
    pub clear_on_disconnect: bool,
}

fn default_true() -> bool { true }
fn default_marker() -> String { DEFAULT_EMULATION_MARKER.to_string() }

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            marker: default_marker(),
            clear_on_disconnect: true,
        }
    }
}

impl EmulationConfig {
    /// Normalize the marker; an empty marker falls back to the default
    pub fn validate(&mut self) {
        let marker = self.marker.trim();
        if marker.is_empty() {
            tracing::warn!("Empty emulation marker, using \"{}\"", DEFAULT_EMULATION_MARKER);
            self.marker = default_marker();
        } else if marker.len() != self.marker.len() {
            self.marker = marker.to_string();
        }
    }
}

// ============================================================================
// Mock Devices
// ============================================================================

/// Controller preloaded into the daemon's mock host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockDeviceConfig {
    /// Display name (matched against the emulation marker)
    pub name: String,

    /// Hand the controller is held in
    pub role: Role,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    #[serde(default)]
    pub serial: String,
}

fn default_manufacturer() -> String { "Valve".to_string() }

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Emulation settings
    #[serde(default)]
    pub emulation: EmulationConfig,

    /// Controllers connected to the mock host at startup
    #[serde(default)]
    pub mock_devices: Vec<MockDeviceConfig>,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        config.emulation.validate();
        config.config_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            emulation_enabled = config.emulation.enabled,
            marker = %config.emulation.marker,
            clear_on_disconnect = config.emulation.clear_on_disconnect,
            mock_devices = config.mock_devices.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = match &self.config_path {
            Some(p) => p.clone(),
            None => Self::default_config_path()
                .ok_or_else(|| ConfigError::ValidationError("No config path".to_string()))?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::ParseError)?;
        fs::write(&path, contents).map_err(ConfigError::IoError)?;

        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

// ============================================================================
// Shared Config (for reload)
// ============================================================================

use std::sync::{Arc, RwLock};

/// Thread-safe shared configuration
pub type SharedConfig = Arc<RwLock<Config>>;

/// Wrap a loaded config for sharing
pub fn share_config(config: Config) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
