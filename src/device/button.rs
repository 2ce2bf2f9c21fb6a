//! BOOT button on GPIO0 (active low)

use esp_idf_hal::gpio::{Gpio0, Input, PinDriver, Pull};

use crate::button::{Press, PressDetector};
use crate::clock::Instant;

pub struct BootButton<'d> {
    pin: PinDriver<'d, Gpio0, Input>,
    detector: PressDetector,
}

impl<'d> BootButton<'d> {
    /// Configures the pin with internal pull-up
    pub fn new(pin: Gpio0) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input(pin)?;
        pin.set_pull(Pull::Up)?;

        Ok(Self {
            pin,
            detector: PressDetector::new(),
        })
    }

    /// Sample the pin; returns a press once it is classified
    pub fn poll(&mut self, now: Instant) -> Option<Press> {
        self.detector.update(self.pin.is_low(), now)
    }
}
