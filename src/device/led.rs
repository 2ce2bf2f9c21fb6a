//! WS2812 pixel output over the RMT peripheral
//!
//! Each colour is sent as GRB, most significant bit first. Bit timings use
//! the common WS2812B values.

use std::time::Duration;

use esp_idf_hal::gpio::OutputPin;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::rmt::config::TransmitConfig;
use esp_idf_hal::rmt::{PinState, Pulse, RmtChannel, TxRmtDriver, VariableLengthSignal};

use crate::animator::Rgb;
use crate::render::PixelSink;

pub struct Ws2812Sink<'d> {
    tx: TxRmtDriver<'d>,
    zero: [Pulse; 2],
    one: [Pulse; 2],
}

impl<'d> Ws2812Sink<'d> {
    pub fn new<C: RmtChannel>(
        channel: impl Peripheral<P = C> + 'd,
        pin: impl Peripheral<P = impl OutputPin> + 'd,
    ) -> anyhow::Result<Self> {
        let config = TransmitConfig::new().clock_divider(1);
        let tx = TxRmtDriver::new(channel, pin, &config)?;

        let ticks_hz = tx.counter_clock()?;
        let pulse = |state, nanos| Pulse::new_with_duration(ticks_hz, state, &Duration::from_nanos(nanos));
        let zero = [pulse(PinState::High, 350)?, pulse(PinState::Low, 800)?];
        let one = [pulse(PinState::High, 700)?, pulse(PinState::Low, 600)?];

        Ok(Self { tx, zero, one })
    }
}

impl PixelSink for Ws2812Sink<'_> {
    fn write(&mut self, frame: &[Rgb]) -> anyhow::Result<()> {
        let mut signal = VariableLengthSignal::new();
        for pixel in frame {
            for byte in [pixel.g, pixel.r, pixel.b] {
                for bit in (0..8).rev() {
                    let pulses = if byte & (1 << bit) != 0 { &self.one } else { &self.zero };
                    signal.push(pulses)?;
                }
            }
        }
        self.tx.start_blocking(&signal)?;
        Ok(())
    }
}
