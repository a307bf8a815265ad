//! # NMEA Decoder Adapter
//!
//! Adapts the `nmea0183` parser to the byte-at-a-time [`NmeaDecoder`]
//! contract.
//!
//! Sentences used:
//! - **GGA**: position, altitude, satellites in use, HDOP, UTC time
//! - **RMC**: position, speed, course over ground, UTC date and time
//!
//! Both sentence types signal new state, including when they report that the
//! receiver has no fix (RMC status `V`, GGA quality `0`, or empty fields).
//! Other sentence types, checksum failures and partial sentences do not. A
//! `$` always starts a new sentence, discarding any partial one.

use chrono::{NaiveDate, NaiveTime};
use nmea0183::{GPSQuality, ParseResult, Parser};
use tracing::trace;

use super::{Fix, NmeaDecoder};

/// Knots to kilometres per hour
const KNOTS_TO_KMPH: f64 = 1.852;

/// `nmea0183`-backed decoder
pub struct Nmea0183Decoder {
    parser: Parser,
    fix: Fix,
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
}

impl std::fmt::Debug for Nmea0183Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nmea0183Decoder")
            .field("fix", &self.fix)
            .finish_non_exhaustive()
    }
}

impl Default for Nmea0183Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Nmea0183Decoder {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            fix: Fix::default(),
            date: None,
            time: None,
        }
    }

    fn update_from_gga(&mut self, gga: &nmea0183::GGA) {
        self.fix.latitude = gga.latitude.as_f64();
        self.fix.longitude = gga.longitude.as_f64();
        self.fix.altitude_m = gga.altitude.meters as f64;
        self.fix.satellites = gga.sat_in_use as u32;
        self.fix.hdop = gga.hdop as f64;
        self.time = to_time(gga.time.hours, gga.time.minutes, gga.time.seconds).or(self.time);
        self.fix.location_valid = gga.gps_quality != GPSQuality::NoFix;
    }

    fn update_from_rmc(&mut self, rmc: &nmea0183::RMC) {
        self.fix.latitude = rmc.latitude.as_f64();
        self.fix.longitude = rmc.longitude.as_f64();
        self.fix.speed_kmph = rmc.speed.as_knots() as f64 * KNOTS_TO_KMPH;
        if let Some(course) = &rmc.course {
            self.fix.course_deg = course.degrees as f64;
        }

        let date = &rmc.datetime.date;
        self.date = NaiveDate::from_ymd_opt(date.year as i32, date.month as u32, date.day as u32)
            .or(self.date);

        let time = &rmc.datetime.time;
        self.time = to_time(time.hours, time.minutes, time.seconds).or(self.time);
        // A `V` status parses with its fields intact
        self.fix.location_valid = rmc.mode.is_valid();
    }

    fn refresh_utc(&mut self) {
        self.fix.utc = match (self.date, self.time) {
            (Some(date), Some(time)) => Some(date.and_time(time)),
            _ => None,
        };
    }
}

fn to_time(hours: u8, minutes: u8, seconds: f32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hours as u32, minutes as u32, seconds.max(0.0).floor() as u32)
}

impl NmeaDecoder for Nmea0183Decoder {
    fn encode(&mut self, byte: u8) -> bool {
        // Restart on every sentence start so a truncated sentence cannot
        // swallow the next one
        if byte == b'$' {
            self.parser = Parser::new();
        }

        let updated = match self.parser.parse_from_byte(byte) {
            None => false,
            Some(Ok(ParseResult::GGA(Some(gga)))) => {
                self.update_from_gga(&gga);
                true
            }
            Some(Ok(ParseResult::RMC(Some(rmc)))) => {
                self.update_from_rmc(&rmc);
                true
            }
            // Receiver is talking but has no solution
            Some(Ok(ParseResult::GGA(None))) | Some(Ok(ParseResult::RMC(None))) => {
                self.fix.location_valid = false;
                true
            }
            Some(Ok(_)) => false,
            Some(Err(e)) => {
                trace!("Discarded NMEA sentence: {}", e);
                false
            }
        };

        if updated {
            self.refresh_utc();
        }
        updated
    }

    fn location_valid(&self) -> bool {
        self.fix.location_valid
    }

    fn fix(&self) -> Fix {
        self.fix
    }
}
