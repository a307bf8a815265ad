//! # GPS Telemetry Node Library
//!
//! Periodically captures a GPS fix and a snapshot of device health, and
//! publishes them as JSON to a cloud messaging endpoint over Wi-Fi.
//!
//! This library provides the building blocks of the node: secrets and
//! settings loading, the GPS acquisition window, the bearer-token cache and
//! the uplink, tied together by the scheduler.

pub mod auth;
pub mod config;
pub mod device;
pub mod error;
pub mod gps;
pub mod http;
pub mod progress;
pub mod scheduler;
pub mod serial;
pub mod settings;
pub mod telemetry;
pub mod uplink;
pub mod wifi;
