//! Operator input scanners. Two workers: the 4x4 yard keypad matrix on
//! chip 3, and the discrete panel buttons on chip 4 port A. Both emit
//! edge events only; held contacts stay quiet.

use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};
use railhal::mcp23017::{Mcp23017, Port, PortConfig};
use railhal::SharedBus;

use crate::api::{
    ButtonEvent, ButtonId, HoldoverRoute, KeyEvent, Press, BUTTON_PERIOD, DOUBLE_PRESS_WINDOW,
    KEYPAD_PERIOD, KEYPAD_SETTLE,
};
use crate::layout;

#[derive(Clone, Copy, Debug)]
pub enum ScanCtl {
    Quit,
}

/// Columns are chip-3 port A outputs, rows port B inputs with pullups and
/// inverted polarity, so a pressed key reads as a 1 on exactly one row.
pub fn init_keypad_chip(bus: &SharedBus) -> Mcp23017 {
    let mut chip = Mcp23017::new(layout::CHIP3_ADDR);
    let cols = PortConfig::ALL_OUTPUTS;
    let rows = PortConfig { iodir: 0x0F, ipol: 0x0F, gppu: 0x0F };
    let mut guard = bus.lock().unwrap();
    if let Err(e) = chip.init(&mut guard, cols, rows) {
        warn!("keypad chip init: {}", e);
    }
    chip
}

/// Buttons on port A (inverted: pressed = 1), panel LEDs and bell enables
/// on port B.
pub fn init_panel_chip(bus: &SharedBus) -> Mcp23017 {
    let mut chip = Mcp23017::new(layout::CHIP4_ADDR);
    let buttons = PortConfig { iodir: 0xFF, ipol: 0xFF, gppu: 0xFF };
    let mut guard = bus.lock().unwrap();
    if let Err(e) = chip.init(&mut guard, buttons, PortConfig::ALL_OUTPUTS) {
        warn!("panel chip init: {}", e);
    }
    chip
}

/// Decode one masked row read into a key value for the driven column.
/// Exactly one row bit is a key; anything else (bounce, two keys) is
/// discarded.
fn decode_row(col: u8, rows: u8) -> Option<u8> {
    let row = match rows & 0x0F {
        0b0001 => 0,
        0b0010 => 1,
        0b0100 => 2,
        0b1000 => 3,
        _ => return None,
    };
    Some(row * 4 + col)
}

fn key_char(value: u8) -> char {
    char::from_digit(value as u32, 16).unwrap().to_ascii_uppercase()
}

pub fn spawn_keypad(
    bus: SharedBus,
    chip: Mcp23017,
) -> (Receiver<KeyEvent>, Sender<ScanCtl>, JoinHandle<()>) {
    let (event_tx, event_rx) = unbounded();
    let (ctl_tx, ctl_rx) = unbounded::<ScanCtl>();
    let handle = thread::Builder::new()
        .name("keypad".into())
        .spawn(move || {
            info!("keypad scanner running");
            let mut last_key: Option<u8> = None;
            loop {
                let mut seen: Option<u8> = None;
                for col in 0..4u8 {
                    // drive only this column low
                    {
                        let mut guard = bus.lock().unwrap();
                        if let Err(e) = chip.write_olat(&mut guard, Port::A, 0xFF ^ (1 << col)) {
                            warn!("keypad column drive: {}", e);
                            continue;
                        }
                    }
                    thread::sleep(KEYPAD_SETTLE);
                    let rows = {
                        let mut guard = bus.lock().unwrap();
                        chip.read_port(&mut guard, Port::B).unwrap_or(0)
                    };
                    if let Some(v) = decode_row(col, rows) {
                        seen = Some(v);
                    }
                }
                match (seen, last_key) {
                    (Some(v), Some(prev)) if v == prev => {} // held, suppress
                    (Some(v), _) => {
                        let _ = event_tx.send(KeyEvent(key_char(v)));
                        last_key = Some(v);
                    }
                    (None, _) => last_key = None,
                }
                match ctl_rx.recv_timeout(KEYPAD_PERIOD.saturating_sub(KEYPAD_SETTLE * 4)) {
                    Ok(ScanCtl::Quit) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            info!("keypad scanner stopped");
        })
        .expect("spawning keypad thread");
    (event_rx, ctl_tx, handle)
}

/// Single/double classification for one contact. A press closing within
/// the window of the previous one upgrades to a double and consumes the
/// stored timestamp, so a third quick press starts a fresh single.
struct PressTracker {
    last_level: bool,
    last_press: Option<Instant>,
}

impl PressTracker {
    fn new() -> Self { PressTracker { last_level: false, last_press: None } }

    fn feed(&mut self, level: bool, now: Instant) -> Option<Press> {
        let edge = level && !self.last_level;
        self.last_level = level;
        if !edge {
            return None;
        }
        match self.last_press {
            Some(prev) if now.duration_since(prev) < DOUBLE_PRESS_WINDOW => {
                self.last_press = None;
                Some(Press::Double)
            }
            _ => {
                self.last_press = Some(now);
                Some(Press::Single)
            }
        }
    }
}

const BUTTON_BITS: [(u8, ButtonId); 8] = [
    (layout::BTN_BIT_HOLDOVER_B1_IN, ButtonId::Holdover(HoldoverRoute::B1In)),
    (layout::BTN_BIT_HOLDOVER_B2_IN, ButtonId::Holdover(HoldoverRoute::B2In)),
    (layout::BTN_BIT_HOLDOVER_B1_OUT, ButtonId::Holdover(HoldoverRoute::B1Out)),
    (layout::BTN_BIT_HOLDOVER_B2_OUT, ButtonId::Holdover(HoldoverRoute::B2Out)),
    (layout::BTN_BIT_MIDWAY_T05, ButtonId::MidwayT05),
    (layout::BTN_BIT_MIDWAY_T06, ButtonId::MidwayT06),
    (layout::BTN_BIT_WYE_CLOSE, ButtonId::WyeClose),
    (layout::BTN_BIT_WYE_OPEN, ButtonId::WyeOpen),
];

pub fn spawn_buttons(
    bus: SharedBus,
    chip: Mcp23017,
) -> (Receiver<ButtonEvent>, Sender<ScanCtl>, JoinHandle<()>) {
    let (event_tx, event_rx) = unbounded();
    let (ctl_tx, ctl_rx) = unbounded::<ScanCtl>();
    let handle = thread::Builder::new()
        .name("buttons".into())
        .spawn(move || {
            info!("button scanner running");
            let mut trackers: Vec<PressTracker> =
                BUTTON_BITS.iter().map(|_| PressTracker::new()).collect();
            loop {
                let port = {
                    let mut guard = bus.lock().unwrap();
                    chip.read_port(&mut guard, Port::A).unwrap_or(0)
                };
                let now = Instant::now();
                for ((bit, id), tracker) in BUTTON_BITS.iter().zip(trackers.iter_mut()) {
                    if let Some(press) = tracker.feed(port & (1 << bit) != 0, now) {
                        let _ = event_tx.send(ButtonEvent { id: *id, press });
                    }
                }
                match ctl_rx.recv_timeout(BUTTON_PERIOD) {
                    Ok(ScanCtl::Quit) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            info!("button scanner stopped");
        })
        .expect("spawning button thread");
    (event_rx, ctl_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn row_patterns_decode_to_single_keys() {
        assert_eq!(decode_row(0, 0b0001), Some(0));
        assert_eq!(decode_row(3, 0b1000), Some(15));
        assert_eq!(decode_row(2, 0b0100), Some(10));
        // two keys in the same column: discarded
        assert_eq!(decode_row(1, 0b0011), None);
        assert_eq!(decode_row(1, 0b0000), None);
        // junk above the row bits is masked off
        assert_eq!(decode_row(1, 0xF0 | 0b0010), Some(5));
    }

    #[test]
    fn keys_cover_the_hex_range() {
        let all: String = (0..16).map(key_char).collect();
        assert_eq!(all, "0123456789ABCDEF");
    }

    #[test]
    fn press_classification_window() {
        let t0 = Instant::now();
        let mut tr = PressTracker::new();
        assert_eq!(tr.feed(true, t0), Some(Press::Single));
        // held: nothing
        assert_eq!(tr.feed(true, t0 + Duration::from_millis(100)), None);
        tr.feed(false, t0 + Duration::from_millis(200));
        // second edge inside the window: double
        assert_eq!(tr.feed(true, t0 + Duration::from_millis(600)), Some(Press::Double));
        tr.feed(false, t0 + Duration::from_millis(700));
        // the double consumed the timestamp, so the next quick press is a
        // fresh single
        assert_eq!(tr.feed(true, t0 + Duration::from_millis(900)), Some(Press::Single));
    }

    #[test]
    fn slow_presses_are_two_singles() {
        let t0 = Instant::now();
        let mut tr = PressTracker::new();
        assert_eq!(tr.feed(true, t0), Some(Press::Single));
        tr.feed(false, t0 + Duration::from_millis(100));
        assert_eq!(tr.feed(true, t0 + Duration::from_millis(1500)), Some(Press::Single));
    }
}
