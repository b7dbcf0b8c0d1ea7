//! 74HC595 signal chain. A dedicated worker owns the four shift-register
//! pins and the two 32-bit frames; color changes arrive as masked frame
//! updates and are applied between shift-outs, never mid-weave.
//!
//! Each signal owns two consecutive bits: the lower drives the red lead,
//! the upper the green lead. Red and green look the same in both frames;
//! yellow puts red in frame A and green in frame B and lets the weave
//! cadence (~6 ms A, ~19 ms B) mix them.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info};
use rppal::gpio::OutputPin;

use crate::api::{Color, SignalCmd, WEAVE_HOLD_A, WEAVE_HOLD_B, WEAVE_IDLE};
use crate::layout::{signal_spec, NUM_SIGNALS};

pub struct ShiftPins {
    pub data: OutputPin,
    pub clock: OutputPin,
    pub latch: OutputPin,
    pub enable: OutputPin,
}

/// Frame bit patterns for one signal at one color.
pub fn encode(signal: usize, color: Color) -> (u32, u32, u32) {
    let (b_red, b_grn) = signal_spec(signal).bits;
    let red = 1u32 << b_red;
    let grn = 1u32 << b_grn;
    let mask = red | grn;
    let (a, b) = match color {
        Color::Off => (0, 0),
        Color::Red => (red, red),
        Color::Green => (grn, grn),
        Color::Yellow => (red, grn),
    };
    (mask, a, b)
}

pub fn send_color(tx: &Sender<SignalCmd>, signal: usize, color: Color) {
    let (mask, data_a, data_b) = encode(signal, color);
    let _ = tx.send(SignalCmd::Update { mask, data_a, data_b });
}

fn shift_out(pins: &mut ShiftPins, frame: u32) {
    // MSB first so bit 0 lands on the first register's first output
    for i in (0..32).rev() {
        if frame & (1 << i) != 0 { pins.data.set_high() } else { pins.data.set_low() }
        pins.clock.set_high();
        pins.clock.set_low();
    }
    pins.latch.set_high();
    pins.latch.set_low();
}

struct Weaver {
    pins: ShiftPins,
    frame_a: u32,
    frame_b: u32,
}

impl Weaver {
    fn apply(&mut self, cmd: SignalCmd) -> bool {
        match cmd {
            SignalCmd::Update { mask, data_a, data_b } => {
                self.frame_a = (self.frame_a & !mask) | (data_a & mask);
                self.frame_b = (self.frame_b & !mask) | (data_b & mask);
                debug!("frames now a={:08x} b={:08x}", self.frame_a, self.frame_b);
                true
            }
            SignalCmd::AllDark => {
                self.frame_a = 0;
                self.frame_b = 0;
                true
            }
            SignalCmd::Quit => false,
        }
    }
}

/// Spawn the shift-register worker. The channel is deep enough that the
/// main loop never blocks recoloring the whole head in one tick.
pub fn spawn(mut pins: ShiftPins) -> (Sender<SignalCmd>, JoinHandle<()>) {
    let (tx, rx) = bounded::<SignalCmd>(NUM_SIGNALS * 4);
    let handle = thread::spawn(move || {
        // output enable is active low
        pins.enable.set_low();
        let mut w = Weaver { pins, frame_a: 0, frame_b: 0 };
        shift_out(&mut w.pins, 0);
        info!("signal chain dark, weaver running");
        'serve: loop {
            // drain everything queued before committing a frame pair
            loop {
                match rx.try_recv() {
                    Ok(cmd) => {
                        if !w.apply(cmd) {
                            break 'serve;
                        }
                    }
                    Err(_) => break,
                }
            }
            if w.frame_a == w.frame_b {
                // no yellow anywhere: one frame is the whole picture, so
                // idle until a command arrives or the refresh timer runs out
                shift_out(&mut w.pins, w.frame_a);
                match rx.recv_timeout(WEAVE_IDLE) {
                    Ok(cmd) => {
                        if !w.apply(cmd) {
                            break 'serve;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break 'serve,
                }
            } else {
                shift_out(&mut w.pins, w.frame_a);
                thread::sleep(WEAVE_HOLD_A);
                shift_out(&mut w.pins, w.frame_b);
                thread::sleep(WEAVE_HOLD_B);
            }
        }
        // quiesce: 32 zero bits, latched
        shift_out(&mut w.pins, 0);
        info!("signal chain dark, weaver stopped");
    });
    (tx, handle)
}

/// Main-loop view of what each head currently displays. Wayside heads
/// change synchronously; semaphore heads go through the servo flow and
/// only record their new color on motion completion.
pub struct SignalTable {
    colors: [Color; NUM_SIGNALS],
}

impl SignalTable {
    pub fn new() -> Self { SignalTable { colors: [Color::Off; NUM_SIGNALS] } }

    pub fn color(&self, signal: usize) -> Color { self.colors[signal - 1] }

    pub fn record(&mut self, signal: usize, color: Color) { self.colors[signal - 1] = color; }

    /// Recolor a wayside head if the displayed color differs.
    pub fn set(&mut self, signal: usize, color: Color, tx: &Sender<SignalCmd>) {
        if self.color(signal) != color {
            send_color(tx, signal, color);
            self.record(signal, color);
        }
    }
}
