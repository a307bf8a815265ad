//! # Progress Spinner
//!
//! Console liveness indicator shown during blocking waits (Wi-Fi attach and
//! GPS acquisition). Each tick prints the next character of `| / - \`
//! followed by a label, then returns the cursor to the start of the line.

use std::io::{self, Write};

/// Spinner frames, advanced one per tick
pub const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];

/// Console spinner
pub struct Spinner {
    out: Box<dyn Write + Send>,
    ticks: u64,
}

impl std::fmt::Debug for Spinner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spinner")
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl Spinner {
    /// Create a spinner that draws on stdout
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Create a spinner that draws on an arbitrary writer
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Self { out: Box::new(out), ticks: 0 }
    }

    /// Draw the next frame with the given label
    pub fn tick(&mut self, label: &str) {
        let frame = SPINNER_FRAMES[(self.ticks % SPINNER_FRAMES.len() as u64) as usize];
        self.ticks += 1;
        // Console output is best effort
        let _ = write!(self.out, "{} {}\r", frame, label);
        let _ = self.out.flush();
    }

    /// Blank the spinner line
    pub fn clear(&mut self) {
        let _ = write!(self.out, "\r{:width$}\r", "", width = 60);
        let _ = self.out.flush();
    }

    /// Total number of frames drawn
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::SharedBuffer;
    use super::*;

    #[test]
    fn test_frames_cycle() {
        let buffer = SharedBuffer::default();
        let mut spinner = Spinner::new(buffer.clone());

        for _ in 0..5 {
            spinner.tick("Finding Satellites");
        }

        assert_eq!(spinner.ticks(), 5);
        let drawn = buffer.contents();
        let frames: Vec<char> = drawn
            .split('\r')
            .filter(|s| !s.is_empty())
            .map(|s| s.chars().next().unwrap())
            .collect();
        assert_eq!(frames, vec!['|', '/', '-', '\\', '|']);
    }

    #[test]
    fn test_label_is_drawn() {
        let buffer = SharedBuffer::default();
        let mut spinner = Spinner::new(buffer.clone());
        spinner.tick("Connecting to WiFi: fleet-ap");
        assert!(buffer.contents().contains("Connecting to WiFi: fleet-ap"));
    }

    #[test]
    fn test_clear_does_not_count_as_tick() {
        let buffer = SharedBuffer::default();
        let mut spinner = Spinner::new(buffer);
        spinner.tick("x");
        spinner.clear();
        assert_eq!(spinner.ticks(), 1);
    }
}
