//! Press classification for the on-board BOOT button
//!
//! The button gives the light a control surface without a network UI:
//! - short press: start a device login (code is printed on the serial log)
//! - hold for [`LONG_PRESS_MS`]: clear all stored state
//!
//! Raw pin levels are sampled by polling from the control loop; the firmware
//! feeds them in together with the current time.

use crate::clock::Instant;

/// Debounce time in milliseconds
const DEBOUNCE_MS: u64 = 50;

/// Hold time that turns a press into a long press
pub const LONG_PRESS_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Press {
    /// Released before the long-press threshold
    Short,
    /// Reported once while still held
    Long,
}

#[derive(Debug, Default)]
pub struct PressDetector {
    pressed: bool,
    last_change_ms: Instant,
    pressed_since: Option<Instant>,
    long_reported: bool,
}

impl PressDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample; returns a press once it is classified
    pub fn update(&mut self, raw_pressed: bool, now: Instant) -> Option<Press> {
        // Debounce: only register state change after stable period
        if raw_pressed != self.pressed && now.saturating_sub(self.last_change_ms) >= DEBOUNCE_MS {
            self.pressed = raw_pressed;
            self.last_change_ms = now;

            if raw_pressed {
                self.pressed_since = Some(now);
                self.long_reported = false;
            } else if self.pressed_since.take().is_some() && !self.long_reported {
                return Some(Press::Short);
            }
        }

        match self.pressed_since {
            Some(since) if !self.long_reported && now.saturating_sub(since) >= LONG_PRESS_MS => {
                self.long_reported = true;
                Some(Press::Long)
            }
            _ => None,
        }
    }
}
