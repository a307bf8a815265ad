//! # Device Probe
//!
//! Collects the runtime health values reported in every telemetry message.
//!
//! On Linux the values come from procfs and sysfs:
//!
//! | Field | Source |
//! |-------|--------|
//! | chip model / revision | `CPU part` / `CPU revision` in `/proc/cpuinfo` |
//! | chip id | Wi-Fi MAC as a 48-bit integer |
//! | flash size | `/sys/block/<dev>/size` × 512 |
//! | free heap | `MemAvailable` in `/proc/meminfo` |
//! | CPU MHz | `/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq` |
//! | SDK version | `/proc/sys/kernel/osrelease` |
//!
//! Anything unreadable is reported as zero or an empty string.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::debug;

/// Runtime part of the device snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeInfo {
    pub chip_model: i32,
    pub chip_revision: i32,
    pub chip_id: u64,
    pub flash_chip_id: u32,
    pub flash_chip_size: u64,
    pub free_heap: u64,
    pub num_of_cores: u32,
    pub cpu_freq_mhz: u32,
    pub sdk_version: String,
    pub uptime_s: u64,
}

/// Source of runtime health values
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SystemProbe {
    /// Read the current runtime values
    async fn runtime_info(&self) -> RuntimeInfo;
}

/// Sector size used by `/sys/block/*/size`
const BLOCK_SECTOR_SIZE: u64 = 512;

/// Probe reading procfs and sysfs
#[derive(Debug, Clone)]
pub struct LinuxSystemProbe {
    root: PathBuf,
    interface: String,
    block_device: String,
    flash_chip_id: u32,
    started: Instant,
}

impl LinuxSystemProbe {
    /// Create a probe for the given Wi-Fi interface and storage device
    pub fn new(interface: &str, block_device: &str, flash_chip_id: u32) -> Self {
        Self::with_root("/", interface, block_device, flash_chip_id)
    }

    /// Create a probe that resolves `/proc` and `/sys` under `root`
    pub fn with_root<P: Into<PathBuf>>(
        root: P,
        interface: &str,
        block_device: &str,
        flash_chip_id: u32,
    ) -> Self {
        Self {
            root: root.into(),
            interface: interface.to_string(),
            block_device: block_device.to_string(),
            flash_chip_id,
            started: Instant::now(),
        }
    }

    /// Count uptime from `started` instead of from construction
    ///
    /// The probe is built once the link is up, so the binary passes the
    /// instant it started at.
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    async fn read(&self, relative: &str) -> Option<String> {
        let path = self.root.join(relative);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Some(contents),
            Err(e) => {
                debug!("Unable to read {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl SystemProbe for LinuxSystemProbe {
    async fn runtime_info(&self) -> RuntimeInfo {
        let (chip_model, chip_revision) = self
            .read("proc/cpuinfo")
            .await
            .map(|text| parse_cpuinfo(&text))
            .unwrap_or((0, 0));

        let chip_id = self
            .read(&format!("sys/class/net/{}/address", self.interface))
            .await
            .and_then(|mac| mac_to_u64(mac.trim()))
            .unwrap_or(0);

        let flash_chip_size = self
            .read(&format!("sys/block/{}/size", self.block_device))
            .await
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|sectors| sectors * BLOCK_SECTOR_SIZE)
            .unwrap_or(0);

        let free_heap = self
            .read("proc/meminfo")
            .await
            .and_then(|text| parse_mem_available(&text))
            .unwrap_or(0);

        let cpu_freq_mhz = self
            .read("sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq")
            .await
            .and_then(|s| s.trim().parse::<u32>().ok())
            .map(|khz| khz / 1000)
            .unwrap_or(0);

        let sdk_version = self
            .read("proc/sys/kernel/osrelease")
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let num_of_cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);

        RuntimeInfo {
            chip_model,
            chip_revision,
            chip_id,
            flash_chip_id: self.flash_chip_id,
            flash_chip_size,
            free_heap,
            num_of_cores,
            cpu_freq_mhz,
            sdk_version,
            uptime_s: self.started.elapsed().as_secs(),
        }
    }
}

/// Extract `CPU part` and `CPU revision` from `/proc/cpuinfo`
pub fn parse_cpuinfo(text: &str) -> (i32, i32) {
    let mut part = 0;
    let mut revision = 0;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "CPU part" if part == 0 => part = parse_int(value).unwrap_or(0),
            "CPU revision" if revision == 0 => revision = parse_int(value).unwrap_or(0),
            // x86 equivalents
            "model" if part == 0 => part = parse_int(value).unwrap_or(0),
            "stepping" if revision == 0 => revision = parse_int(value).unwrap_or(0),
            _ => {}
        }
    }

    (part, revision)
}

fn parse_int(value: &str) -> Option<i32> {
    match value.strip_prefix("0x") {
        Some(hex) => i32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Extract `MemAvailable` from `/proc/meminfo`, in bytes
pub fn parse_mem_available(text: &str) -> Option<u64> {
    text.lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Interpret a colon-separated MAC address as a 48-bit integer
pub fn mac_to_u64(mac: &str) -> Option<u64> {
    let octets: Vec<&str> = mac.split(':').collect();
    if octets.len() != 6 {
        return None;
    }
    octets.iter().try_fold(0u64, |acc, octet| {
        u8::from_str_radix(octet, 16).ok().map(|b| (acc << 8) | b as u64)
    })
}
