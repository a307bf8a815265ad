//! # Telemetry Module
//!
//! Builds the JSON document published for every valid fix.
//!
//! ## Wire Shape
//!
//! ```text
//! {
//!   "device":  { chipModel, chipRevision, chipId, flashChipId, flashChipSize,
//!                freeHeap, numOfCores, cpuFreqMHz, sdkVersion, ipAdress,
//!                macAddress, ssid, rssi, uptime },
//!   "gpsData": { latitude, longitude, altitudeInMeters, speedInKmph, course,
//!                satellites, hdop, dateTime }
//! }
//! ```
//!
//! `ipAdress` is spelled as consumers expect it. `dateTime` is the fix's UTC
//! time shown at a fixed -03:00 offset.

use chrono::{FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::device::RuntimeInfo;
use crate::gps::Fix;
use crate::wifi::LinkInfo;

/// Offset applied to message timestamps, in seconds west of UTC
pub const TIMESTAMP_OFFSET_WEST_S: i32 = 3 * 3600;

/// Device part of the message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub chip_model: i32,
    pub chip_revision: i32,
    pub chip_id: u64,
    pub flash_chip_id: u32,
    pub flash_chip_size: u64,
    pub free_heap: u64,
    pub num_of_cores: u32,
    #[serde(rename = "cpuFreqMHz")]
    pub cpu_freq_mhz: u32,
    pub sdk_version: String,
    #[serde(rename = "ipAdress")]
    pub ip_address: String,
    pub mac_address: String,
    pub ssid: String,
    pub rssi: i32,
    pub uptime: u64,
}

/// GPS part of the message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsData {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_in_meters: f64,
    pub speed_in_kmph: f64,
    pub course: f64,
    pub satellites: u32,
    pub hdop: u32,
    pub date_time: String,
}

/// Message published to the uplink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryMessage {
    pub device: DeviceSnapshot,
    #[serde(rename = "gpsData")]
    pub gps_data: GpsData,
}

impl TelemetryMessage {
    /// Compact JSON encoding
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Assemble a message from runtime state, link state and a fix
///
/// Returns `None` if the fix carries no UTC date and time.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use gps_telemetry_node::device::RuntimeInfo;
/// use gps_telemetry_node::gps::Fix;
/// use gps_telemetry_node::telemetry::build_message;
/// use gps_telemetry_node::wifi::LinkInfo;
///
/// let fix = Fix {
///     latitude: -23.5505,
///     longitude: -46.6333,
///     utc: NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(18, 0, 10)),
///     location_valid: true,
///     ..Fix::default()
/// };
///
/// let message = build_message(&RuntimeInfo::default(), &LinkInfo::default(), &fix).unwrap();
/// assert_eq!(message.gps_data.date_time, "2024-05-01T15:00:10-03:00");
/// ```
pub fn build_message(runtime: &RuntimeInfo, link: &LinkInfo, fix: &Fix) -> Option<TelemetryMessage> {
    let date_time = format_timestamp(fix.utc?)?;

    Some(TelemetryMessage {
        device: DeviceSnapshot {
            chip_model: runtime.chip_model,
            chip_revision: runtime.chip_revision,
            chip_id: runtime.chip_id,
            flash_chip_id: runtime.flash_chip_id,
            flash_chip_size: runtime.flash_chip_size,
            free_heap: runtime.free_heap,
            num_of_cores: runtime.num_of_cores,
            cpu_freq_mhz: runtime.cpu_freq_mhz,
            sdk_version: runtime.sdk_version.clone(),
            ip_address: link.ip_address.clone(),
            mac_address: link.mac_address.clone(),
            ssid: link.ssid.clone(),
            rssi: link.rssi,
            uptime: runtime.uptime_s,
        },
        gps_data: GpsData {
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude_in_meters: fix.altitude_m,
            speed_in_kmph: fix.speed_kmph,
            course: fix.course_deg,
            satellites: fix.satellites,
            hdop: hdop_hundredths(fix.hdop),
            date_time,
        },
    })
}

/// Format a UTC instant at the fixed -03:00 offset
///
/// Date arithmetic is real: 01:15 UTC on May 2nd becomes 22:15 on May 1st.
pub fn format_timestamp(utc: NaiveDateTime) -> Option<String> {
    let offset = FixedOffset::west_opt(TIMESTAMP_OFFSET_WEST_S)?;
    let local = Utc.from_utc_datetime(&utc).with_timezone(&offset);
    Some(local.format("%Y-%m-%dT%H:%M:%S%:z").to_string())
}

/// HDOP in hundredths, as receivers and embedded decoders report it
fn hdop_hundredths(hdop: f64) -> u32 {
    if hdop.is_finite() && hdop > 0.0 {
        (hdop * 100.0).round() as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};
    use serde_json::Value;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, s).unwrap()
    }

    fn runtime() -> RuntimeInfo {
        RuntimeInfo {
            chip_model: 0xd08,
            chip_revision: 3,
            chip_id: 0xb827eb123456,
            flash_chip_id: 0,
            flash_chip_size: 31914983424,
            free_heap: 2470703104,
            num_of_cores: 4,
            cpu_freq_mhz: 1500,
            sdk_version: "6.1.0-rpi7-rpi-v8".to_string(),
            uptime_s: 3723,
        }
    }

    fn link() -> LinkInfo {
        LinkInfo {
            ip_address: "192.168.4.23".to_string(),
            mac_address: "B8:27:EB:12:34:56".to_string(),
            ssid: "fleet-ap".to_string(),
            rssi: -61,
        }
    }

    fn fix() -> Fix {
        Fix {
            latitude: -23.5505,
            longitude: -46.6333,
            altitude_m: 760.2,
            speed_kmph: 23.15,
            course_deg: 87.3,
            satellites: 9,
            hdop: 0.9,
            utc: Some(utc(2024, 5, 1, 18, 0, 10)),
            location_valid: true,
        }
    }

    #[test]
    fn test_timestamp_shifted_three_hours() {
        assert_eq!(
            format_timestamp(utc(2024, 5, 1, 18, 0, 10)).unwrap(),
            "2024-05-01T15:00:10-03:00"
        );
    }

    #[test]
    fn test_timestamp_before_three_utc_rolls_back_a_day() {
        assert_eq!(
            format_timestamp(utc(2024, 5, 2, 1, 15, 30)).unwrap(),
            "2024-05-01T22:15:30-03:00"
        );
        assert_eq!(
            format_timestamp(utc(2024, 1, 1, 0, 0, 0)).unwrap(),
            "2023-12-31T21:00:00-03:00"
        );
    }

    #[test]
    fn test_timestamp_parses_as_rfc3339() {
        let stamp = format_timestamp(utc(2024, 2, 29, 2, 59, 59)).unwrap();
        let parsed = DateTime::parse_from_rfc3339(&stamp).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), -3 * 3600);
        assert_eq!(parsed.naive_utc(), utc(2024, 2, 29, 2, 59, 59));
    }

    #[test]
    fn test_message_layout() {
        let message = build_message(&runtime(), &link(), &fix()).unwrap();
        let value: Value = serde_json::from_slice(&message.to_json().unwrap()).unwrap();

        let device = &value["device"];
        assert_eq!(device["chipModel"], 0xd08);
        assert_eq!(device["chipRevision"], 3);
        assert_eq!(device["chipId"], 0xb827eb123456u64);
        assert_eq!(device["flashChipId"], 0);
        assert_eq!(device["flashChipSize"], 31914983424u64);
        assert_eq!(device["freeHeap"], 2470703104u64);
        assert_eq!(device["numOfCores"], 4);
        assert_eq!(device["cpuFreqMHz"], 1500);
        assert_eq!(device["sdkVersion"], "6.1.0-rpi7-rpi-v8");
        assert_eq!(device["ipAdress"], "192.168.4.23");
        assert_eq!(device["macAddress"], "B8:27:EB:12:34:56");
        assert_eq!(device["ssid"], "fleet-ap");
        assert_eq!(device["rssi"], -61);
        assert_eq!(device["uptime"], 3723);
        assert_eq!(device.as_object().unwrap().len(), 14);

        let gps = &value["gpsData"];
        assert_eq!(gps["latitude"], -23.5505);
        assert_eq!(gps["longitude"], -46.6333);
        assert_eq!(gps["altitudeInMeters"], 760.2);
        assert_eq!(gps["speedInKmph"], 23.15);
        assert_eq!(gps["course"], 87.3);
        assert_eq!(gps["satellites"], 9);
        assert_eq!(gps["hdop"], 90);
        assert_eq!(gps["dateTime"], "2024-05-01T15:00:10-03:00");
        assert_eq!(gps.as_object().unwrap().len(), 8);
    }

    #[test]
    fn test_json_is_compact_and_ordered() {
        let message = build_message(&runtime(), &link(), &fix()).unwrap();
        let json = String::from_utf8(message.to_json().unwrap()).unwrap();

        assert!(json.starts_with("{\"device\":{\"chipModel\":3336,"));
        assert!(json.contains("},\"gpsData\":{\"latitude\":-23.5505,"));
        assert!(!json.contains('\n'));
        assert!(!json.contains("ipAddress"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let first = build_message(&runtime(), &link(), &fix()).unwrap();
        let second = build_message(&runtime(), &link(), &fix()).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn test_fix_without_time_builds_nothing() {
        let fix = Fix { utc: None, ..fix() };
        assert!(build_message(&runtime(), &link(), &fix).is_none());
    }

    #[test]
    fn test_hdop_hundredths() {
        assert_eq!(hdop_hundredths(0.9), 90);
        assert_eq!(hdop_hundredths(1.25), 125);
        assert_eq!(hdop_hundredths(99.9), 9990);
        assert_eq!(hdop_hundredths(0.0), 0);
        assert_eq!(hdop_hundredths(f64::NAN), 0);
    }
}
