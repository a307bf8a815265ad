//! # Error Types
//!
//! Custom error types for the GPS telemetry node using `thiserror`.

use thiserror::Error;

/// Main error type for the telemetry node
#[derive(Debug, Error)]
pub enum TelemetryNodeError {
    /// Secrets blob not present at the configured path
    #[error("Secrets file not found: {0}")]
    ConfigMissing(String),

    /// Secrets blob present but unusable
    #[error("Secrets file malformed: {0}")]
    ConfigMalformed(String),

    /// Node settings errors
    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No usable GPS serial device
    #[error("No GPS serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Wi-Fi link errors
    #[error("WiFi error: {0}")]
    Wifi(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryNodeError {
    /// Whether this error halts telemetry for the lifetime of the process
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TelemetryNodeError::ConfigMissing(_) | TelemetryNodeError::ConfigMalformed(_)
        )
    }
}

/// Result type alias for the telemetry node
pub type Result<T> = std::result::Result<T, TelemetryNodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_terminal() {
        assert!(TelemetryNodeError::ConfigMissing("/secrets.json".into()).is_config_error());
        assert!(TelemetryNodeError::ConfigMalformed("empty Ssid".into()).is_config_error());
        assert!(!TelemetryNodeError::Wifi("down".into()).is_config_error());
        assert!(!TelemetryNodeError::Serial("gone".into()).is_config_error());
    }

    #[test]
    fn test_error_messages() {
        let err = TelemetryNodeError::ConfigMissing("/secrets.json".into());
        assert_eq!(err.to_string(), "Secrets file not found: /secrets.json");

        let err = TelemetryNodeError::SerialPortNotFound("/dev/ttyS0, /dev/ttyUSB0".into());
        assert!(err.to_string().contains("/dev/ttyUSB0"));
    }
}
