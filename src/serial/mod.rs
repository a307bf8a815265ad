//! # Serial Communication Module
//!
//! Handles the UART link to the GPS receiver.
//!
//! This module handles:
//! - Opening the receiver port at 9600 baud, 8N1
//! - Exposing the port through [`SerialPortIO`] so the sampler can be tested
//!   without hardware

pub mod port_trait;

pub use port_trait::{SerialPortIO, TokioSerialPort};

use crate::error::{Result, TelemetryNodeError};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Default NMEA baud rate
pub const GPS_BAUD_RATE: u32 = 9600;

/// Fallback device paths tried after the configured one
const FALLBACK_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyS0",   // On-board UART
    "/dev/ttyAMA0", // PL011 UART on ARM boards
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// GPS receiver serial port
pub struct GpsSerial {
    port: TokioSerialPort,
    device_path: String,
}

impl std::fmt::Debug for GpsSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpsSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl GpsSerial {
    /// Open the GPS receiver, trying the configured path first
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` if no candidate path can be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gps_telemetry_node::serial::{GpsSerial, GPS_BAUD_RATE};
    ///
    /// let serial = GpsSerial::open("/dev/ttyS0", GPS_BAUD_RATE)?;
    /// println!("GPS on {}", serial.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(preferred: &str, baud_rate: u32) -> Result<Self> {
        let mut paths = vec![preferred];
        paths.extend(FALLBACK_DEVICE_PATHS.iter().filter(|p| **p != preferred));
        Self::open_with_paths(&paths, baud_rate)
    }

    /// Open the GPS receiver with custom device paths
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try in order
    /// * `baud_rate` - Line speed
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened GPS receiver at {} ({} baud, 8N1)", path, baud_rate);
                    return Ok(Self {
                        port: TokioSerialPort::new(port),
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(TelemetryNodeError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with 8N1 framing
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TelemetryNodeError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Device path of the opened port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Hand over the port to its reader
    pub fn into_port(self) -> TokioSerialPort {
        self.port
    }
}
