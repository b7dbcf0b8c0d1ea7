use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use log::{trace, warn};
use rppal::i2c::I2c;

/// Hardware fault taxonomy shared by every driver in this crate.
///
/// `Bus` is transient: the caller skips the operation and retries on its next
/// tick. `DeviceAbsent` is latched at probe time: the device never ACKed, so
/// writes to it become no-ops and reads report the absence.
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    #[error("i2c bus error: {0}")]
    Bus(#[from] rppal::i2c::Error),
    #[error("device 0x{0:02x} did not ack")]
    DeviceAbsent(u8),
    #[error("gpio error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Register-oriented wrapper over the single `/dev/i2c-1` bus.
///
/// All chip drivers share one of these through a mutex; read-modify-write
/// sequences hold the lock across both halves so latch updates from
/// different tasks cannot interleave.
pub struct I2cBus {
    i2c: I2c,
    addr: u16,
    absent: HashSet<u8>,
}

pub type SharedBus = Arc<Mutex<I2cBus>>;

impl I2cBus {
    pub fn new() -> Result<Self, HwError> {
        let i2c = I2c::new()?;
        Ok(I2cBus { i2c, addr: 0xFFFF, absent: HashSet::new() })
    }

    pub fn into_shared(self) -> SharedBus { Arc::new(Mutex::new(self)) }

    fn select(&mut self, addr: u8) -> Result<(), HwError> {
        if self.addr != addr as u16 {
            self.i2c.set_slave_address(addr as u16)?;
            self.addr = addr as u16;
        }
        Ok(())
    }

    /// One-byte read probe. A device that does not ACK is remembered as
    /// absent; all further traffic to it short-circuits.
    pub fn probe(&mut self, addr: u8) -> bool {
        if self.absent.contains(&addr) {
            return false;
        }
        let ok = self.select(addr).is_ok() && self.i2c.smbus_read_byte(0).is_ok();
        if !ok {
            warn!("no ack from device 0x{:02x}, disabling it", addr);
            self.absent.insert(addr);
        }
        ok
    }

    pub fn present(&self, addr: u8) -> bool { !self.absent.contains(&addr) }

    pub fn read_byte(&mut self, addr: u8, reg: u8) -> Result<u8, HwError> {
        if !self.present(addr) {
            return Err(HwError::DeviceAbsent(addr));
        }
        self.select(addr)?;
        let v = self.i2c.smbus_read_byte(reg)?;
        trace!("i2c rd 0x{:02x}[0x{:02x}] = 0x{:02x}", addr, reg, v);
        Ok(v)
    }

    /// Writes to an absent device are silent no-ops so that a partially
    /// wired harness still boots.
    pub fn write_byte(&mut self, addr: u8, reg: u8, v: u8) -> Result<(), HwError> {
        if !self.present(addr) {
            trace!("i2c wr 0x{:02x}[0x{:02x}] dropped, device absent", addr, reg);
            return Ok(());
        }
        self.select(addr)?;
        trace!("i2c wr 0x{:02x}[0x{:02x}] = 0x{:02x}", addr, reg, v);
        self.i2c.smbus_write_byte(reg, v)?;
        Ok(())
    }

    pub fn write_block(&mut self, addr: u8, reg: u8, bytes: &[u8]) -> Result<(), HwError> {
        if !self.present(addr) {
            trace!("i2c block wr 0x{:02x}[0x{:02x}] dropped, device absent", addr, reg);
            return Ok(());
        }
        self.select(addr)?;
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.push(reg);
        buf.extend_from_slice(bytes);
        trace!("i2c block wr 0x{:02x}[0x{:02x}] {} bytes", addr, reg, bytes.len());
        self.i2c.write(&buf)?;
        Ok(())
    }
}
