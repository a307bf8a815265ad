//! # GPS Module
//!
//! Turns the receiver's NMEA byte stream into position fixes.
//!
//! This module handles:
//! - The [`Fix`] value handed from the sampler to the telemetry builder
//! - The byte-at-a-time [`NmeaDecoder`] contract and its `nmea0183` adapter
//! - The bounded acquisition window in [`sampler`]

pub mod decoder;
pub mod sampler;

pub use decoder::Nmea0183Decoder;
pub use sampler::GpsSampler;

use chrono::NaiveDateTime;

/// One positional solution from the receiver
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fix {
    /// Latitude in degrees (-90 to +90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to +180)
    pub longitude: f64,
    /// Altitude above mean sea level in meters
    pub altitude_m: f64,
    /// Ground speed in km/h
    pub speed_kmph: f64,
    /// Course over ground in degrees
    pub course_deg: f64,
    /// Satellites used in the solution
    pub satellites: u32,
    /// Horizontal dilution of precision
    pub hdop: f64,
    /// UTC date and time of the solution, if the receiver has reported one
    pub utc: Option<NaiveDateTime>,
    /// Whether the receiver reports the location as valid
    pub location_valid: bool,
}

impl Fix {
    /// A fix is publishable once the receiver vouches for the location,
    /// the date and time are known, and the coordinates are in range.
    pub fn is_valid(&self) -> bool {
        self.location_valid
            && self.utc.is_some()
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Byte-at-a-time NMEA decoder
///
/// Mirrors the contract of the small decoders used on microcontrollers: the
/// caller feeds every received byte and learns when a complete sentence has
/// updated the decoder's state.
pub trait NmeaDecoder: Send {
    /// Feed one byte; returns `true` when a complete sentence produced new state
    fn encode(&mut self, byte: u8) -> bool;

    /// Whether the current location is valid
    fn location_valid(&self) -> bool;

    /// Snapshot of the current decoder state
    fn fix(&self) -> Fix;
}
