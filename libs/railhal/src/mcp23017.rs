use bitflags::bitflags;
use log::{info, warn};

use crate::i2c::{HwError, I2cBus};

// Register map in bank-0 addressing. IOCON is written first at init to pin
// the chip into this mode regardless of its power-on history.
const IODIRA: u8 = 0x00;
const IODIRB: u8 = 0x01;
const IPOLA: u8 = 0x02;
const IPOLB: u8 = 0x03;
const IOCON: u8 = 0x0A;
const GPPUA: u8 = 0x0C;
const GPPUB: u8 = 0x0D;
const GPIOA: u8 = 0x12;
const GPIOB: u8 = 0x13;
const OLATA: u8 = 0x14;
const OLATB: u8 = 0x15;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Iocon: u8 {
        const BANK   = 0x80;
        const MIRROR = 0x40;
        const SEQOP  = 0x20;
        const DISSLW = 0x10;
        const HAEN   = 0x08;
        const ODR    = 0x04;
        const INTPOL = 0x02;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Port {
    A,
    B,
}

/// Per-chip init values. A bit set in `iodir` makes the pin an input;
/// `ipol` inverts the read sense; `gppu` enables the weak pullup.
#[derive(Clone, Copy, Debug)]
pub struct PortConfig {
    pub iodir: u8,
    pub ipol: u8,
    pub gppu: u8,
}

impl PortConfig {
    pub const ALL_INPUTS_PULLED: PortConfig = PortConfig { iodir: 0xFF, ipol: 0x00, gppu: 0xFF };
    pub const ALL_OUTPUTS: PortConfig = PortConfig { iodir: 0x00, ipol: 0x00, gppu: 0x00 };
}

/// One MCP23017 port expander. Handles are cheap copies of (address,
/// presence); cloning one does not re-run init.
#[derive(Clone)]
pub struct Mcp23017 {
    addr: u8,
    present: bool,
}

impl Mcp23017 {
    pub fn new(addr: u8) -> Self { Mcp23017 { addr, present: false } }

    pub fn addr(&self) -> u8 { self.addr }

    pub fn present(&self) -> bool { self.present }

    pub fn init(
        &mut self,
        bus: &mut I2cBus,
        port_a: PortConfig,
        port_b: PortConfig,
    ) -> Result<(), HwError> {
        if !bus.probe(self.addr) {
            warn!("port expander 0x{:02x} absent, its inputs read as 0", self.addr);
            self.present = false;
            return Ok(());
        }
        bus.write_byte(self.addr, IOCON, Iocon::empty().bits())?;
        bus.write_byte(self.addr, IODIRA, port_a.iodir)?;
        bus.write_byte(self.addr, IODIRB, port_b.iodir)?;
        bus.write_byte(self.addr, IPOLA, port_a.ipol)?;
        bus.write_byte(self.addr, IPOLB, port_b.ipol)?;
        bus.write_byte(self.addr, GPPUA, port_a.gppu)?;
        bus.write_byte(self.addr, GPPUB, port_b.gppu)?;
        // start with all output latches low
        bus.write_byte(self.addr, OLATA, 0x00)?;
        bus.write_byte(self.addr, OLATB, 0x00)?;
        self.present = true;
        info!("port expander 0x{:02x} up", self.addr);
        Ok(())
    }

    pub fn read_port(&self, bus: &mut I2cBus, port: Port) -> Result<u8, HwError> {
        if !self.present {
            return Ok(0);
        }
        bus.read_byte(self.addr, if port == Port::A { GPIOA } else { GPIOB })
    }

    /// Both ports as one word: port A in bits 0-7, port B in bits 8-15.
    pub fn read_word(&self, bus: &mut I2cBus) -> Result<u16, HwError> {
        if !self.present {
            return Ok(0);
        }
        let a = bus.read_byte(self.addr, GPIOA)?;
        let b = bus.read_byte(self.addr, GPIOB)?;
        Ok((b as u16) << 8 | a as u16)
    }

    pub fn write_olat(&self, bus: &mut I2cBus, port: Port, v: u8) -> Result<(), HwError> {
        if !self.present {
            return Ok(());
        }
        bus.write_byte(self.addr, if port == Port::A { OLATA } else { OLATB }, v)
    }

    pub fn read_olat(&self, bus: &mut I2cBus, port: Port) -> Result<u8, HwError> {
        if !self.present {
            return Ok(0);
        }
        bus.read_byte(self.addr, if port == Port::A { OLATA } else { OLATB })
    }

    /// Read-modify-write of an output latch. The caller holds the bus lock
    /// for the whole call, so latch bits owned by other tasks survive.
    pub fn olat_rmw(
        &self,
        bus: &mut I2cBus,
        port: Port,
        mask: u8,
        bits: u8,
    ) -> Result<(), HwError> {
        if !self.present {
            return Ok(());
        }
        let cur = self.read_olat(bus, port)?;
        self.write_olat(bus, port, (cur & !mask) | (bits & mask))
    }
}
