pub mod gpio;
pub mod i2c;
pub mod mcp23017;
pub mod pca9685;
pub mod w1temp;

pub use i2c::{HwError, I2cBus, SharedBus};
