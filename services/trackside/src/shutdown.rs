//! Shutdown arming and the ordered quiesce sequence.
//!
//! Arming: a single pulled-up momentary contact. The first
//! release-after-press starts a descending tone countdown, one clip per
//! second; pressing again during the countdown aborts it. Completing the
//! countdown (or ^C at the console) hands the daemon to the sequencer,
//! which parks every mechanism in its safe state and persists the servo
//! positions.

use std::path::Path;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{error, info, warn};
use railhal::mcp23017::{Mcp23017, Port};
use railhal::SharedBus;

use crate::api::{LampCmd, SignalCmd, TurnoutKind, TurnoutPos, SHUTDOWN_MOTION_WAIT};
use crate::calib;
use crate::keypad::ScanCtl;
use crate::layout::TONE_SEQUENCE;
use crate::mirror::MirrorCmd;
use crate::turnout::{Movers, TurnoutTable};

const TONE_SPACING: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArmState {
    Idle,
    Pressed,
    Counting,
    AbortWait,
}

pub struct Arming {
    state: ArmState,
    step: usize,
    next_tone: Instant,
}

impl Arming {
    pub fn new() -> Arming {
        Arming { state: ArmState::Idle, step: 0, next_tone: Instant::now() }
    }

    pub fn counting(&self) -> bool { self.state == ArmState::Counting }

    /// Feed the button level once per main-loop tick. Returns true when
    /// the countdown has run to completion and the daemon should exit.
    pub fn poll(&mut self, pressed: bool, now: Instant, play: &mut dyn FnMut(&str)) -> bool {
        match self.state {
            ArmState::Idle => {
                if pressed {
                    self.state = ArmState::Pressed;
                }
            }
            ArmState::Pressed => {
                if !pressed {
                    info!("shutdown armed, countdown starting");
                    self.state = ArmState::Counting;
                    self.step = 0;
                    self.next_tone = now;
                }
            }
            ArmState::Counting => {
                if pressed {
                    info!("shutdown countdown aborted by operator");
                    play(crate::layout::CLIP_UNLOCK);
                    self.step = 0;
                    self.state = ArmState::AbortWait;
                } else if now >= self.next_tone {
                    if self.step < TONE_SEQUENCE.len() {
                        play(TONE_SEQUENCE[self.step]);
                        self.step += 1;
                        self.next_tone = now + TONE_SPACING;
                    } else {
                        info!("shutdown countdown complete");
                        return true;
                    }
                }
            }
            ArmState::AbortWait => {
                if !pressed {
                    self.state = ArmState::Idle;
                }
            }
        }
        false
    }
}

/// Worker plumbing the sequencer needs to take everything down in order.
pub struct Workers {
    pub signal_tx: Sender<SignalCmd>,
    pub signal_handle: JoinHandle<()>,
    pub lamp_txs: Vec<Sender<LampCmd>>,
    pub lamp_handles: Vec<JoinHandle<()>>,
    pub keypad_ctl: Sender<ScanCtl>,
    pub keypad_handle: JoinHandle<()>,
    pub buttons_ctl: Sender<ScanCtl>,
    pub buttons_handle: JoinHandle<()>,
    pub mirror_tx: Sender<MirrorCmd>,
    pub mirror_handle: JoinHandle<()>,
}

fn join(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("{} worker panicked during shutdown", name);
    }
}

/// Hardware surfaces the sequencer drives directly.
pub struct QuiesceOutputs<'a> {
    pub relays: &'a mut [rppal::gpio::OutputPin],
    pub first_digit_led: &'a mut rppal::gpio::OutputPin,
    pub lock_led: &'a mut rppal::gpio::OutputPin,
    pub timing: &'a mut rppal::gpio::OutputPin,
}

/// The ordered quiesce. Best effort throughout: a failing step logs and
/// the rest still runs, because half a safe state beats none.
pub fn sequence(
    workers: Workers,
    movers: &mut Movers,
    table: &mut TurnoutTable,
    outputs: &mut QuiesceOutputs,
    panel: &Mcp23017,
    bus: &SharedBus,
    calib_path: &Path,
) {
    info!("shutdown sequence starting");

    // 1. stop the input and lamp workers first so nothing new arrives
    for tx in &workers.lamp_txs {
        let _ = tx.send(LampCmd::Quit);
    }
    for h in workers.lamp_handles {
        join("lamp", h);
    }
    let _ = workers.keypad_ctl.send(ScanCtl::Quit);
    join("keypad", workers.keypad_handle);
    let _ = workers.buttons_ctl.send(ScanCtl::Quit);
    join("buttons", workers.buttons_handle);
    let _ = workers.mirror_tx.send(MirrorCmd::Quit);
    join("holdover-leds", workers.mirror_handle);

    // 2. raise the gates and semaphore flags
    let mechanical: Vec<usize> = table
        .iter()
        .filter(|t| matches!(t.kind, TurnoutKind::Gate | TurnoutKind::Semaphore))
        .map(|t| t.index)
        .collect();
    for &t in &mechanical {
        movers.move_to(table, t, TurnoutPos::Open);
    }

    // 3. give the in-flight motion a bounded window to finish
    let deadline = Instant::now() + SHUTDOWN_MOTION_WAIT;
    for &t in &mechanical {
        let left = deadline.saturating_duration_since(Instant::now());
        if !movers.wait_idle(table, t, left) {
            warn!("T{:02} still moving at shutdown, releasing it anyway", t);
        }
    }

    // 4. release all servo pulses
    movers.release_all();

    // 5. dark the signal chain; the weaver's exit path latches 32 zeros
    let _ = workers.signal_tx.send(SignalCmd::AllDark);
    let _ = workers.signal_tx.send(SignalCmd::Quit);
    join("signals", workers.signal_handle);

    // 6. drop the relays and panel indicator pins
    for pin in outputs.relays.iter_mut() {
        pin.set_low();
    }
    outputs.first_digit_led.set_low();
    outputs.lock_led.set_low();
    outputs.timing.set_low();

    // 7. silence the bells and the holdover LEDs in one latch write
    {
        let mut guard = bus.lock().unwrap();
        if let Err(e) = panel.write_olat(&mut guard, Port::B, 0x00) {
            warn!("clearing panel latch: {}", e);
        }
    }

    // 8. persist the turnout positions
    if let Err(e) = calib::save(calib_path, &table.records()) {
        error!("saving calibration: {}", e);
    }

    info!("shutdown sequence complete");
}
