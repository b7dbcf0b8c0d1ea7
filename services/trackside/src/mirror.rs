//! Holdover position-indicator mirror. A small worker owns the two panel
//! LEDs that echo which staging siding is occupied; the main loop feeds it
//! occupancy changes and it refreshes the latch bits at a relaxed cadence.
//! Its latch writes stay inside the LED mask so the crossing bell bits on
//! the same port are never disturbed.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::{info, warn};
use railhal::mcp23017::{Mcp23017, Port};
use railhal::SharedBus;

use crate::api::MIRROR_PERIOD;
use crate::layout::{LED_BIT_HOLDOVER_B1, LED_BIT_HOLDOVER_B2, OLATB_LED_MASK};

#[derive(Clone, Copy, Debug)]
pub enum MirrorCmd {
    Set { b1: bool, b2: bool },
    Quit,
}

pub fn spawn(bus: SharedBus, panel: Mcp23017) -> (Sender<MirrorCmd>, JoinHandle<()>) {
    let (tx, rx) = unbounded::<MirrorCmd>();
    let handle = thread::Builder::new()
        .name("holdover-leds".into())
        .spawn(move || {
            let mut bits: u8 = 0;
            let mut dirty = true;
            loop {
                match rx.recv_timeout(MIRROR_PERIOD) {
                    Ok(MirrorCmd::Set { b1, b2 }) => {
                        let next = (b1 as u8) << LED_BIT_HOLDOVER_B1
                            | (b2 as u8) << LED_BIT_HOLDOVER_B2;
                        if next != bits {
                            bits = next;
                            dirty = true;
                        }
                    }
                    Ok(MirrorCmd::Quit) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                if dirty {
                    let mut guard = bus.lock().unwrap();
                    match panel.olat_rmw(&mut guard, Port::B, OLATB_LED_MASK, bits) {
                        Ok(()) => dirty = false,
                        Err(e) => warn!("holdover LED latch: {}", e),
                    }
                }
            }
            info!("holdover LED mirror stopped");
        })
        .expect("spawning mirror thread");
    (tx, handle)
}
