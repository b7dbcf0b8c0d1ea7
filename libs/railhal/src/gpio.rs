use rppal::gpio::{Gpio, InputPin, OutputPin};

use crate::i2c::HwError;

/// Claim a BCM pin as a low output.
pub fn output(gpio: &Gpio, pin: u8) -> Result<OutputPin, HwError> {
    let mut p = gpio.get(pin)?.into_output();
    p.set_low();
    Ok(p)
}

/// Claim a BCM pin as an input with the internal pullup enabled.
pub fn input_pullup(gpio: &Gpio, pin: u8) -> Result<InputPin, HwError> {
    Ok(gpio.get(pin)?.into_input_pullup())
}

pub fn write(pin: &mut OutputPin, level: bool) {
    if level { pin.set_high() } else { pin.set_low() }
}

pub fn read(pin: &InputPin) -> bool { pin.is_high() }
