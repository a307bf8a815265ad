//! # GPS Telemetry Node
//!
//! Publish GPS fixes and device health to a cloud messaging endpoint over
//! Wi-Fi.
//!
//! This application samples an NMEA receiver on a UART, and for every valid
//! fix POSTs a JSON document authenticated with an OAuth 2.0 bearer token.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use gps_telemetry_node::auth::TokenCache;
use gps_telemetry_node::device::LinuxSystemProbe;
use gps_telemetry_node::gps::{GpsSampler, Nmea0183Decoder};
use gps_telemetry_node::http::{HttpTransport, ReqwestTransport};
use gps_telemetry_node::progress::Spinner;
use gps_telemetry_node::scheduler::{bootstrap, BootOutcome, Scheduler};
use gps_telemetry_node::serial::GpsSerial;
use gps_telemetry_node::settings::{LoggingSettings, Settings};
use gps_telemetry_node::uplink::Publisher;
use gps_telemetry_node::wifi::NmcliWifiLink;

/// Environment variable naming the settings file
const SETTINGS_ENV: &str = "GPS_NODE_SETTINGS";

/// Settings file used when the environment does not name one
const DEFAULT_SETTINGS_PATH: &str = "config/default.toml";

/// File name prefix of the rolling log
const LOG_FILE_PREFIX: &str = "gps-telemetry-node.log";

/// Main entry point for the GPS telemetry node
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load node settings and set up logging
///    - Load the secrets blob; halt if it is missing or malformed
///    - Associate with Wi-Fi, spinning until the link is up
///
/// 2. **Main Loop**
///    - Sample the receiver for up to one window
///    - On a valid fix, build the document, freshen the token and publish
///    - Cool down for 5 s after every publish attempt
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C stops the loop between awaits
///    - Log totals and exit
///
/// A halted node stays resident until Ctrl+C, doing nothing.
///
/// # Errors
///
/// Returns error if:
/// - The settings file is invalid
/// - Wi-Fi association cannot be started
/// - No GPS serial device can be opened
///
/// # Examples
///
/// ```bash
/// GPS_NODE_SETTINGS=/etc/gps-node.toml cargo run --release
/// ```
///
/// Expected output:
/// ```text
/// INFO gps_telemetry_node: GPS Telemetry Node v0.1.0 starting...
/// INFO gps_telemetry_node::config: Secrets file found at /secrets.json (412 bytes)
/// INFO gps_telemetry_node::wifi: Connected to fleet-ap
/// INFO gps_telemetry_node::serial: Opened GPS receiver at /dev/ttyS0 (9600 baud, 8N1)
/// INFO gps_telemetry_node::uplink: Telemetry published (201)
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();

    let settings_path =
        std::env::var(SETTINGS_ENV).unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    let settings = Settings::load_or_default(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path))?;

    // Held for the process lifetime so buffered log lines are flushed
    let _log_guard = init_logging(&settings.logging)?;

    info!("GPS Telemetry Node v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut link = NmcliWifiLink::new(&settings.network.interface);
    let mut spinner = Spinner::stdout();
    let attach_poll = Duration::from_millis(settings.network.attach_poll_ms);

    let boot = tokio::select! {
        boot = bootstrap(Path::new(&settings.secrets.path), &mut link, &mut spinner, attach_poll) => boot?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C during boot, shutting down...");
            return Ok(());
        }
    };

    let configuration = match boot {
        BootOutcome::Online(configuration) => configuration,
        BootOutcome::Halted(_) => {
            warn!("Node halted, press Ctrl+C to exit");
            tokio::signal::ctrl_c().await?;
            return Ok(());
        }
    };

    let serial = GpsSerial::open(&settings.serial.port, settings.serial.baud_rate)?;
    info!("GPS serial port opened at: {}", serial.device_path());

    let sampler = GpsSampler::with_timing(
        serial.into_port(),
        Nmea0183Decoder::new(),
        Spinner::stdout(),
        Duration::from_millis(settings.gps.window_ms),
        Duration::from_millis(settings.gps.spinner_interval_ms),
    );

    let timeout = settings.uplink.request_timeout_ms.map(Duration::from_millis);
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(timeout)?);

    let tokens = TokenCache::new(transport.clone(), configuration.auth.clone())
        .with_renewal_margin(Duration::from_secs(settings.uplink.renewal_margin_s))
        .with_body_limit(settings.uplink.diagnostic_body_limit);
    let publisher = Publisher::new(transport, tokens, &configuration.endpoint_uri)
        .with_body_limit(settings.uplink.diagnostic_body_limit);

    let probe = LinuxSystemProbe::new(
        &settings.network.interface,
        &settings.device.block_device,
        settings.device.flash_chip_id,
    )
    .started_at(started);

    let mut scheduler = Scheduler::new(sampler, link, probe, publisher)
        .with_cooldown(Duration::from_millis(settings.uplink.cooldown_ms));

    info!("Press Ctrl+C to exit");

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    info!(
        "Published {} messages over {} iterations",
        scheduler.published(),
        scheduler.iterations()
    );

    Ok(())
}

/// Console logging, plus a daily rolling file when `log_dir` is set
///
/// `RUST_LOG` overrides the configured level.
fn init_logging(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .with_context(|| format!("Invalid log level: {}", settings.level))?;

    let (file_layer, guard) = match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
