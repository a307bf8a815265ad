//! # Settings Module
//!
//! Handles loading and validating node settings from TOML files.
//!
//! Settings describe the node itself (serial port, timings, logging). The
//! cloud identity lives in the secrets blob, see [`crate::config`].

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, TelemetryNodeError};

/// Main settings structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub gps: GpsSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub uplink: UplinkSettings,
    #[serde(default)]
    pub secrets: SecretsSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// GPS serial port settings
#[derive(Debug, Deserialize, Clone)]
pub struct SerialSettings {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Acquisition window settings
#[derive(Debug, Deserialize, Clone)]
pub struct GpsSettings {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_spinner_interval_ms")]
    pub spinner_interval_ms: u64,
}

/// Wi-Fi interface settings
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkSettings {
    #[serde(default = "default_interface")]
    pub interface: String,

    #[serde(default = "default_attach_poll_ms")]
    pub attach_poll_ms: u64,
}

/// Uplink and token settings
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkSettings {
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default = "default_renewal_margin_s")]
    pub renewal_margin_s: u64,

    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    #[serde(default = "default_diagnostic_body_limit")]
    pub diagnostic_body_limit: usize,
}

/// Secrets blob location
#[derive(Debug, Deserialize, Clone)]
pub struct SecretsSettings {
    #[serde(default = "default_secrets_path")]
    pub path: String,
}

/// Device probe settings
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSettings {
    #[serde(default = "default_block_device")]
    pub block_device: String,

    #[serde(default)]
    pub flash_chip_id: u32,
}

/// Logging settings
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyS0".to_string() }
fn default_baud_rate() -> u32 { 9600 }

fn default_window_ms() -> u64 { 1000 }
fn default_spinner_interval_ms() -> u64 { 100 }

fn default_interface() -> String { "wlan0".to_string() }
fn default_attach_poll_ms() -> u64 { 100 }

fn default_cooldown_ms() -> u64 { 5000 }
fn default_renewal_margin_s() -> u64 { 60 }
fn default_diagnostic_body_limit() -> usize { 256 }

fn default_secrets_path() -> String { "/secrets.json".to_string() }

fn default_block_device() -> String { "mmcblk0".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialSettings {
    fn default() -> Self {
        Self { port: default_serial_port(), baud_rate: default_baud_rate() }
    }
}

impl Default for GpsSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            spinner_interval_ms: default_spinner_interval_ms(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self { interface: default_interface(), attach_poll_ms: default_attach_poll_ms() }
    }
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            renewal_margin_s: default_renewal_margin_s(),
            request_timeout_ms: None,
            diagnostic_body_limit: default_diagnostic_body_limit(),
        }
    }
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self { path: default_secrets_path() }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self { block_device: default_block_device(), flash_chip_id: 0 }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: default_log_level(), log_dir: None }
    }
}

/// Baud rates a NMEA receiver is commonly configured for
const SUPPORTED_BAUD_RATES: [u32; 6] = [4800, 9600, 19200, 38400, 57600, 115200];

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the settings file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gps_telemetry_node::settings::Settings;
    ///
    /// let settings = Settings::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load settings from a file, or fall back to defaults if it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings values
    ///
    /// # Errors
    ///
    /// Returns error if any value is out of its valid range
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 4800, 9600, 19200, 38400, 57600, 115200",
            ));
        }

        if self.gps.window_ms == 0 || self.gps.window_ms > 10000 {
            return Err(invalid("window_ms must be between 1 and 10000"));
        }

        if self.gps.spinner_interval_ms == 0 || self.gps.spinner_interval_ms > 1000 {
            return Err(invalid("spinner_interval_ms must be between 1 and 1000"));
        }

        if self.network.interface.is_empty() {
            return Err(invalid("network interface cannot be empty"));
        }

        if self.network.attach_poll_ms == 0 || self.network.attach_poll_ms > 10000 {
            return Err(invalid("attach_poll_ms must be between 1 and 10000"));
        }

        if self.uplink.cooldown_ms > 3_600_000 {
            return Err(invalid("cooldown_ms must be at most 3600000"));
        }

        if self.uplink.request_timeout_ms == Some(0) {
            return Err(invalid("request_timeout_ms must be greater than 0 when set"));
        }

        if self.uplink.diagnostic_body_limit == 0 {
            return Err(invalid("diagnostic_body_limit must be greater than 0"));
        }

        if self.secrets.path.is_empty() {
            return Err(invalid("secrets path cannot be empty"));
        }

        if self.logging.level.is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> TelemetryNodeError {
    TelemetryNodeError::Settings(toml::de::Error::custom(message))
}
