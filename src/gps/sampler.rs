//! # GPS Sampler
//!
//! Drains the receiver's UART into the decoder within a bounded acquisition
//! window.
//!
//! ## Window Contract
//!
//! - The window lasts `window` (1 s by default) on the monotonic clock.
//! - Every received byte is fed to the decoder, in order.
//! - The first new-state signal from the decoder closes the window early.
//! - The spinner ticks every `tick` (100 ms by default) while the window is
//!   open and nothing has been decoded yet.
//!
//! Bytes read from the port but not yet fed when the window closes stay
//! buffered for the next window.

use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::{Fix, NmeaDecoder};
use crate::progress::Spinner;
use crate::serial::SerialPortIO;

/// Default acquisition window
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1000);

/// Default spinner cadence
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Spinner label while acquiring
const ACQUIRING_LABEL: &str = "Finding Satellites";

/// Size of a single UART read
const READ_CHUNK: usize = 64;

/// GPS sampler owning the receiver port and decoder
pub struct GpsSampler<P: SerialPortIO, D: NmeaDecoder> {
    port: P,
    decoder: D,
    spinner: Spinner,
    pending: BytesMut,
    window: Duration,
    tick: Duration,
}

impl<P: SerialPortIO, D: NmeaDecoder> GpsSampler<P, D> {
    /// Create a sampler with default window and cadence
    pub fn new(port: P, decoder: D, spinner: Spinner) -> Self {
        Self::with_timing(port, decoder, spinner, DEFAULT_WINDOW, DEFAULT_TICK)
    }

    /// Create a sampler with custom window and spinner cadence
    pub fn with_timing(
        port: P,
        decoder: D,
        spinner: Spinner,
        window: Duration,
        tick: Duration,
    ) -> Self {
        Self {
            port,
            decoder,
            spinner,
            pending: BytesMut::with_capacity(READ_CHUNK * 4),
            window,
            tick,
        }
    }

    /// Run one acquisition window
    ///
    /// # Returns
    ///
    /// `Some(Fix)` if the decoder produced new state during the window and
    /// reports the location as valid, otherwise `None`.
    pub async fn sample_once(&mut self) -> Option<Fix> {
        let deadline = Instant::now() + self.window;

        if !self.acquire(deadline).await {
            debug!("No new GPS data in window");
            return None;
        }

        if self.decoder.location_valid() {
            Some(self.decoder.fix())
        } else {
            debug!("GPS data received but location not valid");
            None
        }
    }

    /// Feed bytes until the decoder reports new state or the deadline passes
    async fn acquire(&mut self, deadline: Instant) -> bool {
        let mut buf = [0u8; READ_CHUNK];

        loop {
            if self.drain_pending() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            self.spinner.tick(ACQUIRING_LABEL);
            let slot_end = (now + self.tick).min(deadline);

            // Keep reading until this spinner slot is over
            loop {
                match timeout_at(slot_end, self.port.read(&mut buf)).await {
                    Ok(Ok(0)) => {
                        warn!("GPS serial port reached end of stream");
                        tokio::time::sleep_until(deadline).await;
                        return false;
                    }
                    Ok(Ok(n)) => {
                        self.pending.extend_from_slice(&buf[..n]);
                        if self.drain_pending() {
                            return true;
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("GPS serial read failed: {}", e);
                        tokio::time::sleep_until(deadline).await;
                        return false;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    /// Feed buffered bytes to the decoder, stopping right after new state
    fn drain_pending(&mut self) -> bool {
        while self.pending.has_remaining() {
            let byte = self.pending.get_u8();
            if self.decoder.encode(byte) {
                return true;
            }
        }
        false
    }

    /// Spinner frames drawn so far
    pub fn spinner_ticks(&self) -> u64 {
        self.spinner.ticks()
    }

    /// Bytes read but not yet decoded
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
