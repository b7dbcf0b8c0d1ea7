//! The cooperative main loop. One tick runs the fixed order: pump motion
//! events, read sensors, holdover, midway, wye, grade crossings, signal
//! recolor, yard route step, operator input, temperature refresh, status
//! publish, shutdown poll, then sleeps out the remainder of the period.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::Receiver;
use log::{info, warn};
use railhal::gpio as hgpio;
use railhal::mcp23017::Mcp23017;
use railhal::w1temp::W1Temp;
use railhal::{HwError, SharedBus};
use rppal::gpio::{Gpio, InputPin, OutputPin};

use crate::api::{
    ButtonEvent, ButtonId, KeyEvent, TurnoutPos, MAIN_TICK, SNAPSHOT_EVERY, TEMP_REFRESH,
};
use crate::aspects::{self, Semaphores};
use crate::control::LayoutCtl;
use crate::crossing::{Crossing, GateOps};
use crate::holdover::Holdover;
use crate::layout;
use crate::midway::Midway;
use crate::mirror::MirrorCmd;
use crate::sensors::SensorSource;
use crate::shutdown::{self, Arming, QuiesceOutputs, Workers};
use crate::signals::SignalTable;
use crate::sound::Player;
use crate::status::StatusWriter;
use crate::turnout::{temp_offset, Movers, TurnoutTable};
use crate::wye::Wye;
use crate::yard::Yard;

/// Direct GPIO the daemon drives itself (everything not behind an
/// expander or the shift register).
pub struct Outputs {
    pub relays: Vec<OutputPin>,
    pub first_digit_led: OutputPin,
    pub lock_led: OutputPin,
    pub timing: OutputPin,
    pub shutdown_btn: InputPin,
}

pub fn claim_outputs(gpio: &Gpio) -> Result<Outputs, HwError> {
    let mut relays = Vec::with_capacity(layout::PIN_RELAYS.len());
    for pin in layout::PIN_RELAYS {
        relays.push(hgpio::output(gpio, pin)?);
    }
    Ok(Outputs {
        relays,
        first_digit_led: hgpio::output(gpio, layout::PIN_KEYPAD_FIRST_LED)?,
        lock_led: hgpio::output(gpio, layout::PIN_ROUTE_LOCK_LED)?,
        timing: hgpio::output(gpio, layout::PIN_TIMING_TEST)?,
        shutdown_btn: hgpio::input_pullup(gpio, layout::PIN_SHUTDOWN_BTN)?,
    })
}

/// The real-hardware implementation of the section controllers' actuator
/// surface, assembled fresh from disjoint borrows each tick.
struct HwCtl<'a> {
    movers: &'a mut Movers,
    table: &'a mut TurnoutTable,
    outputs: &'a mut Outputs,
    player: &'a Player,
}

impl LayoutCtl for HwCtl<'_> {
    fn move_turnout(&mut self, turnout: usize, pos: TurnoutPos) {
        self.movers.move_to(self.table, turnout, pos);
    }

    fn turnout_idle(&self, turnout: usize) -> bool { self.table.get(turnout).is_idle() }

    fn turnout_at(&self, turnout: usize) -> Option<TurnoutPos> { self.table.get(turnout).at_pos() }

    fn set_relay(&mut self, relay: usize, level: bool) {
        hgpio::write(&mut self.outputs.relays[relay], level);
    }

    fn set_lock_led(&mut self, on: bool) { hgpio::write(&mut self.outputs.lock_led, on) }

    fn set_first_digit_led(&mut self, on: bool) {
        hgpio::write(&mut self.outputs.first_digit_led, on)
    }

    fn play(&mut self, clip: &str) { self.player.play(clip) }
}

impl GateOps for HwCtl<'_> {
    fn command(&mut self, turnout: usize, pos: TurnoutPos) {
        self.movers.move_to(self.table, turnout, pos);
    }

    fn is_idle(&mut self, turnout: usize) -> bool {
        self.movers.pump(self.table);
        self.table.get(turnout).is_idle()
    }
}

pub struct Daemon {
    pub bus: SharedBus,
    pub movers: Movers,
    pub table: TurnoutTable,
    pub sigtable: SignalTable,
    pub semaphores: Semaphores,
    pub source: SensorSource,
    pub crossings: Vec<Crossing>,
    pub holdover: Holdover,
    pub midway: Midway,
    pub wye: Wye,
    pub yard: Yard,
    pub outputs: Outputs,
    pub panel: Mcp23017,
    pub player: Player,
    pub status: StatusWriter,
    pub temp: W1Temp,
    pub arming: Arming,
    pub workers: Workers,
    pub key_rx: Receiver<KeyEvent>,
    pub btn_rx: Receiver<ButtonEvent>,
    pub stop: Arc<AtomicBool>,
    pub calib_path: PathBuf,
}

impl Daemon {
    pub fn run(mut self) {
        let mut iter: u32 = 0;
        let mut temp_due = Instant::now();
        let mut mirror_last: Option<(bool, bool)> = None;
        info!("main loop running");

        loop {
            let now = Instant::now();
            // scope-probe pulse: one edge per iteration
            self.outputs.timing.toggle();

            self.movers.pump(&mut self.table);
            let snap = self.source.read();

            {
                let mut ctl = HwCtl {
                    movers: &mut self.movers,
                    table: &mut self.table,
                    outputs: &mut self.outputs,
                    player: &self.player,
                };
                self.holdover.tick(&snap, now, &mut ctl);
                self.midway.tick(&snap, now, &mut ctl);
                self.wye.tick(&snap, now, &mut ctl);
                for gc in self.crossings.iter_mut() {
                    gc.tick(&snap, now, &mut ctl);
                }
            }

            aspects::apply(
                &snap,
                &mut self.sigtable,
                &mut self.semaphores,
                &mut self.movers,
                &mut self.table,
                &self.workers.signal_tx,
            );

            {
                let mut ctl = HwCtl {
                    movers: &mut self.movers,
                    table: &mut self.table,
                    outputs: &mut self.outputs,
                    player: &self.player,
                };
                self.yard.step(&mut ctl);

                while let Ok(KeyEvent(digit)) = self.key_rx.try_recv() {
                    info!("yard keypad: {}", digit);
                    self.yard.key(digit, &mut ctl);
                }
                while let Ok(ButtonEvent { id, press }) = self.btn_rx.try_recv() {
                    info!("panel button {:?} ({:?})", id, press);
                    match id {
                        ButtonId::Holdover(route) => self.holdover.button(route, now, &mut ctl),
                        ButtonId::MidwayT05 => self.midway.button(5, press, now, &mut ctl),
                        ButtonId::MidwayT06 => self.midway.button(6, press, now, &mut ctl),
                        ButtonId::WyeClose => self.wye.button(false, now, &mut ctl),
                        ButtonId::WyeOpen => self.wye.button(true, now, &mut ctl),
                    }
                }
            }

            if now >= temp_due {
                temp_due = now + TEMP_REFRESH;
                match self.temp.read_c() {
                    Ok(c) => {
                        info!("ambient {:.1} C", c);
                        self.movers.set_temp_offset(temp_offset(c));
                    }
                    Err(e) => warn!("temperature read: {}", e),
                }
            }

            let mirror_now = (snap.block(1), snap.block(2));
            if mirror_last != Some(mirror_now) {
                mirror_last = Some(mirror_now);
                let _ = self.workers.mirror_tx.send(MirrorCmd::Set {
                    b1: mirror_now.0,
                    b2: mirror_now.1,
                });
            }

            iter = iter.wrapping_add(1);
            if iter % SNAPSHOT_EVERY == 0 {
                self.status.publish(
                    &snap,
                    &self.sigtable,
                    &self.table,
                    &self.crossings,
                    self.yard.last_route(),
                );
            }

            // the contact is pulled up; pressed reads low
            let pressed = self.outputs.shutdown_btn.is_low();
            let player = &self.player;
            let mut play = |clip: &str| player.play(clip);
            if self.arming.poll(pressed, now, &mut play) {
                info!("operator shutdown");
                break;
            }

            if self.stop.load(Ordering::Relaxed) {
                info!("interrupt received, shutting down");
                break;
            }
            if self.source.finished() {
                info!("simulation script exhausted, shutting down");
                break;
            }

            thread::sleep(MAIN_TICK);
        }

        self.quiesce();
    }

    fn quiesce(self) {
        let Daemon {
            bus,
            mut movers,
            mut table,
            mut outputs,
            panel,
            workers,
            calib_path,
            ..
        } = self;
        let mut q = QuiesceOutputs {
            relays: &mut outputs.relays,
            first_digit_led: &mut outputs.first_digit_led,
            lock_led: &mut outputs.lock_led,
            timing: &mut outputs.timing,
        };
        shutdown::sequence(workers, &mut movers, &mut table, &mut q, &panel, &bus, &calib_path);
    }
}
