//! # Wi-Fi Module
//!
//! Brings the uplink up at boot and reports link details for telemetry.
//!
//! Attach has no timeout: the node is useless offline, so boot spins until
//! the link reports [`LinkStatus::Connected`]. Reassociation after a later
//! drop is left to the platform's network manager.

pub mod nmcli;

pub use nmcli::NmcliWifiLink;

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::config::NetworkCredentials;
use crate::error::Result;
use crate::progress::Spinner;

/// Default poll cadence while waiting for association
pub const DEFAULT_ATTACH_POLL: Duration = Duration::from_millis(100);

/// Association state of the station interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Link part of the device snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkInfo {
    pub ip_address: String,
    pub mac_address: String,
    pub ssid: String,
    pub rssi: i32,
}

/// Station-mode Wi-Fi link
#[async_trait]
pub trait WifiLink: Send {
    /// Start associating with the given network
    async fn begin(&mut self, credentials: &NetworkCredentials) -> Result<()>;

    /// Current association state
    async fn status(&mut self) -> LinkStatus;

    /// Current address, MAC, SSID and signal strength
    async fn link_info(&mut self) -> LinkInfo;
}

/// Associate and block until the link is up
///
/// Draws the spinner at `poll` cadence while waiting.
///
/// # Errors
///
/// Returns error only if association cannot be started at all
pub async fn attach<L: WifiLink + ?Sized>(
    link: &mut L,
    credentials: &NetworkCredentials,
    spinner: &mut Spinner,
    poll: Duration,
) -> Result<()> {
    link.begin(credentials).await?;

    let label = format!("Connecting to WiFi: {}", credentials.ssid);
    while link.status().await != LinkStatus::Connected {
        spinner.tick(&label);
        tokio::time::sleep(poll).await;
    }

    spinner.clear();
    info!("Connected to {}", credentials.ssid);
    Ok(())
}
