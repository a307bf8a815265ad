//! NetworkManager-backed Wi-Fi link
//!
//! Association goes through `nmcli`; link state and details are read from
//! sysfs, procfs and the usual wireless tools.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{LinkInfo, LinkStatus, WifiLink};
use crate::config::NetworkCredentials;
use crate::error::{Result, TelemetryNodeError};

/// Wi-Fi link driven through NetworkManager
#[derive(Debug, Clone)]
pub struct NmcliWifiLink {
    interface: String,
    root: PathBuf,
}

impl NmcliWifiLink {
    pub fn new(interface: &str) -> Self {
        Self { interface: interface.to_string(), root: PathBuf::from("/") }
    }

    async fn read(&self, relative: &str) -> Option<String> {
        tokio::fs::read_to_string(self.root.join(relative)).await.ok()
    }

    async fn command_output(program: &str, args: &[&str]) -> Option<String> {
        match Command::new(program).args(args).output().await {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                debug!("{} exited with {}", program, output.status);
                None
            }
            Err(e) => {
                debug!("Unable to run {}: {}", program, e);
                None
            }
        }
    }
}

#[async_trait]
impl WifiLink for NmcliWifiLink {
    async fn begin(&mut self, credentials: &NetworkCredentials) -> Result<()> {
        info!("Associating {} with {}", self.interface, credentials.ssid);

        let mut child = Command::new("nmcli")
            .args(connect_args(&credentials.ssid, &self.interface))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TelemetryNodeError::Wifi(format!("Failed to run nmcli: {}", e)))?;

        // The password answers the `--ask` prompt so it never shows up in argv
        if let Some(mut stdin) = child.stdin.take() {
            let answer = format!("{}\n", credentials.password);
            if let Err(e) = stdin.write_all(answer.as_bytes()).await {
                warn!("nmcli did not take the password prompt: {}", e);
            }
        }

        let output = child.wait_with_output().await?;

        // The network manager keeps retrying on its own, so a failed first
        // attempt is not fatal
        if !output.status.success() {
            warn!(
                "nmcli connect exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        let operstate = self.read(&format!("sys/class/net/{}/operstate", self.interface)).await;
        match operstate.as_deref().map(str::trim) {
            Some("up") => LinkStatus::Connected,
            _ => LinkStatus::Disconnected,
        }
    }

    async fn link_info(&mut self) -> LinkInfo {
        let iface = self.interface.clone();

        let ip_address = Self::command_output("ip", &["-4", "-o", "addr", "show", "dev", &iface])
            .await
            .and_then(|out| parse_ipv4(&out))
            .unwrap_or_default();

        let mac_address = self
            .read(&format!("sys/class/net/{}/address", iface))
            .await
            .map(|mac| mac.trim().to_uppercase())
            .unwrap_or_default();

        let ssid = Self::command_output("iwgetid", &["-r", &iface])
            .await
            .map(|out| out.trim().to_string())
            .unwrap_or_default();

        let rssi = self
            .read("proc/net/wireless")
            .await
            .and_then(|text| parse_wireless_level(&text, &iface))
            .unwrap_or(0);

        LinkInfo { ip_address, mac_address, ssid, rssi }
    }
}

/// Arguments for `nmcli --ask device wifi connect`, password excluded
pub fn connect_args<'a>(ssid: &'a str, interface: &'a str) -> [&'a str; 7] {
    ["--ask", "device", "wifi", "connect", ssid, "ifname", interface]
}

/// Extract the IPv4 address from `ip -4 -o addr show` output
pub fn parse_ipv4(output: &str) -> Option<String> {
    let mut fields = output.split_whitespace();
    fields.find(|f| *f == "inet")?;
    let cidr = fields.next()?;
    Some(cidr.split('/').next()?.to_string())
}

/// Extract the signal level in dBm for `iface` from `/proc/net/wireless`
pub fn parse_wireless_level(text: &str, iface: &str) -> Option<i32> {
    let prefix = format!("{}:", iface);
    let line = text.lines().map(str::trim).find(|line| line.starts_with(&prefix))?;
    // iface: status link level noise ...
    let level = line.split_whitespace().nth(3)?;
    level.trim_end_matches('.').parse::<f32>().ok().map(|l| l as i32)
}
