use log::{info, warn};

use crate::i2c::{HwError, I2cBus};

const MODE1: u8 = 0x00;
const LED0_ON_L: u8 = 0x06;
const ALL_LED_OFF_H: u8 = 0xFD;
const PRESCALE: u8 = 0xFE;

const MODE1_RESTART: u8 = 0x80;
const MODE1_AI: u8 = 0x20;
const MODE1_SLEEP: u8 = 0x10;
const ALL_OFF: u8 = 0x10;

/// Prescale for ~105 Hz refresh from the 25 MHz internal oscillator:
/// 25e6 / (4096 * 105) - 1. The slower-than-standard frame keeps the
/// usable SG90 range at counts 300..=900.
const PRESCALE_105HZ: u8 = 57;

/// One 16-channel PWM servo board. The board that fails its probe stays
/// constructed but inert, so the rest of the layout keeps running.
#[derive(Clone)]
pub struct Pca9685 {
    addr: u8,
    present: bool,
}

impl Pca9685 {
    pub fn new(addr: u8) -> Self { Pca9685 { addr, present: false } }

    pub fn addr(&self) -> u8 { self.addr }

    pub fn present(&self) -> bool { self.present }

    /// Safety write first (all outputs released), then the sleep /
    /// prescale / wake dance the chip requires: PRESCALE only loads while
    /// SLEEP is set, and RESTART must be rewritten after wake to resume PWM.
    pub fn init(&mut self, bus: &mut I2cBus) -> Result<(), HwError> {
        if !bus.probe(self.addr) {
            warn!("servo board 0x{:02x} absent, channels on it are disabled", self.addr);
            self.present = false;
            return Ok(());
        }
        bus.write_byte(self.addr, ALL_LED_OFF_H, ALL_OFF)?;
        bus.write_byte(self.addr, MODE1, MODE1_SLEEP)?;
        bus.write_byte(self.addr, PRESCALE, PRESCALE_105HZ)?;
        bus.write_byte(self.addr, MODE1, MODE1_AI)?;
        std::thread::sleep(std::time::Duration::from_micros(500));
        bus.write_byte(self.addr, MODE1, MODE1_AI | MODE1_RESTART)?;
        self.present = true;
        info!("servo board 0x{:02x} up, prescale {}", self.addr, PRESCALE_105HZ);
        Ok(())
    }

    /// Program one channel's pulse. ON counts are staggered by channel
    /// (`channel * 10`) so sixteen servos never draw inrush current on the
    /// same PWM edge of the shared 5 V rail.
    pub fn set_channel_pulse(&self, bus: &mut I2cBus, channel: u8, pulse: u16) -> Result<(), HwError> {
        debug_assert!(channel < 16);
        if !self.present {
            return Ok(());
        }
        let on: u16 = channel as u16 * 10;
        let off: u16 = on + pulse;
        let block = [
            (on & 0xFF) as u8,
            (on >> 8) as u8,
            (off & 0xFF) as u8,
            (off >> 8) as u8,
        ];
        bus.write_block(self.addr, LED0_ON_L + 4 * channel, &block)
    }

    /// Release all sixteen outputs; servos go limp. Used at shutdown.
    pub fn all_off(&self, bus: &mut I2cBus) -> Result<(), HwError> {
        if !self.present {
            return Ok(());
        }
        bus.write_byte(self.addr, ALL_LED_OFF_H, ALL_OFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stagger_math() {
        // channel 15 at max usable pulse must still fit the 12-bit counter
        let on = 15u16 * 10;
        let off = on + 900;
        assert!(off < 4096);
    }

    #[test]
    fn prescale_is_105hz() {
        let hz = 25_000_000.0 / (4096.0 * (PRESCALE_105HZ as f64 + 1.0));
        assert!((hz - 105.0).abs() < 1.0);
    }
}
