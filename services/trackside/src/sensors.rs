//! Occupancy and track-sensor input. Chips 1 and 2 are read as two 16-bit
//! words once per main-loop tick; everything downstream works from the
//! resulting snapshot, so a mid-tick sensor change cannot split a decision.

use log::warn;
use railhal::mcp23017::{Mcp23017, PortConfig};
use railhal::SharedBus;

use crate::layout::{self, SENSOR_MAP};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorSnapshot {
    pub state1: u16,
    pub state2: u16,
}

impl SensorSnapshot {
    /// Test a sensor by its 0-31 map index. Bits 0-15 are chip 1,
    /// 16-31 chip 2.
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < SENSOR_MAP.len());
        if index < 16 {
            self.state1 & (1 << index) != 0
        } else {
            self.state2 & (1 << (index - 16)) != 0
        }
    }

    pub fn block(&self, block: usize) -> bool { self.bit(layout::block_sensor(block)) }

    /// The combined word published in `sensor.dat`: chip 2 high, chip 1 low.
    pub fn word(&self) -> u32 { (self.state2 as u32) << 16 | self.state1 as u32 }

    /// 1-based indices of the occupied blocks.
    pub fn occupied_blocks(&self) -> impl Iterator<Item = usize> + '_ {
        (1..=10).filter(|&b| self.block(b))
    }
}

pub struct Sensors {
    bus: SharedBus,
    chip1: Mcp23017,
    chip2: Mcp23017,
    last: SensorSnapshot,
}

impl Sensors {
    /// The detector boards pull their lines low when a block draws
    /// current, so both chips invert on read: occupied = 1 in the snapshot.
    pub fn new(bus: SharedBus) -> Self {
        let sensor_cfg = PortConfig { iodir: 0xFF, ipol: 0xFF, gppu: 0xFF };
        let mut chip1 = Mcp23017::new(layout::CHIP1_ADDR);
        let mut chip2 = Mcp23017::new(layout::CHIP2_ADDR);
        {
            let mut bus = bus.lock().unwrap();
            if let Err(e) = chip1.init(&mut bus, sensor_cfg, sensor_cfg) {
                warn!("chip1 init: {}", e);
            }
            if let Err(e) = chip2.init(&mut bus, sensor_cfg, sensor_cfg) {
                warn!("chip2 init: {}", e);
            }
        }
        Sensors { bus, chip1, chip2, last: SensorSnapshot::default() }
    }

    /// Read both chips. A transient bus fault keeps the previous word for
    /// that chip; the next tick retries.
    pub fn read(&mut self) -> SensorSnapshot {
        let mut bus = self.bus.lock().unwrap();
        match self.chip1.read_word(&mut bus) {
            Ok(w) => self.last.state1 = w,
            Err(e) => warn!("chip1 read: {}", e),
        }
        match self.chip2.read_word(&mut bus) {
            Ok(w) => self.last.state2 = w,
            Err(e) => warn!("chip2 read: {}", e),
        }
        self.last
    }
}

/// Where snapshots come from: the live expanders, or a playback script
/// when running with `--simulate`.
pub enum SensorSource {
    Live(Sensors),
    Script(crate::sim::ScriptPlayer),
}

impl SensorSource {
    pub fn read(&mut self) -> SensorSnapshot {
        match self {
            SensorSource::Live(s) => s.read(),
            SensorSource::Script(p) => p.read(),
        }
    }

    /// Script playback ends; live hardware never does.
    pub fn finished(&self) -> bool {
        match self {
            SensorSource::Live(_) => false,
            SensorSource::Script(p) => p.finished(),
        }
    }
}
