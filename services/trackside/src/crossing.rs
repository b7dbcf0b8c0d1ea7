//! Grade crossings. The six-state machine runs in the main loop off the
//! per-tick sensor snapshot; each crossing also has a lamp worker that owns
//! the alternating flash and the bell-enable bit on chip 4's output latch.

use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use railhal::mcp23017::{Mcp23017, Port};
use railhal::SharedBus;

use crate::api::{
    BellKind, Color, GradeState, LampCmd, SignalCmd, TurnoutPos, APPROACH_TIMEOUT, DEPART_LINGER,
    GATE_DELAY, LAMP_PERIOD, ROAD_LINGER,
};
use crate::layout::{CrossingSpec, BELL_ROAD_ENABLED};
use crate::sensors::SensorSnapshot;
use crate::signals::send_color;

/// The slice of turnout control a crossing needs. The main loop adapts the
/// mover/table pair onto this; tests substitute a recorder.
pub trait GateOps {
    fn command(&mut self, turnout: usize, pos: TurnoutPos);
    fn is_idle(&mut self, turnout: usize) -> bool;
}

pub struct Crossing {
    pub spec: &'static CrossingSpec,
    pub state: GradeState,
    pub lamps: bool,
    gate_delay: Instant,
    apr_timer: Instant,
    road_timer: Instant,
    dep_timer: Instant,
    /// First gate servo commanded open; gateRaise watches its handle.
    pending_gate: Option<usize>,
    lamp_tx: Sender<LampCmd>,
}

impl Crossing {
    pub fn new(spec: &'static CrossingSpec, lamp_tx: Sender<LampCmd>) -> Crossing {
        let now = Instant::now();
        Crossing {
            spec,
            state: GradeState::Idle,
            lamps: false,
            gate_delay: now,
            apr_timer: now,
            road_timer: now,
            dep_timer: now,
            pending_gate: None,
            lamp_tx,
        }
    }

    fn set_state(&mut self, next: GradeState) {
        debug!("GC{:02} {} -> {}", self.spec.id, self.state.snapshot(), next.snapshot());
        self.state = next;
    }

    fn enter_gate_raise(&mut self, now: Instant, gates: &mut impl GateOps) {
        for &g in self.spec.gates {
            gates.command(g, TurnoutPos::Open);
        }
        self.pending_gate = self.spec.gates.first().copied();
        if self.pending_gate.is_none() {
            // gateless crossings still linger here so the lamps stay on a
            // realistic while before the departure window starts
            self.dep_timer = now + DEPART_LINGER;
        }
        self.set_state(GradeState::GateRaise);
    }

    pub fn tick(&mut self, snap: &SensorSnapshot, now: Instant, gates: &mut impl GateOps) {
        let apr_e = snap.bit(self.spec.apr_east);
        let road = snap.bit(self.spec.road);
        let apr_w = snap.bit(self.spec.apr_west);

        match self.state {
            GradeState::Idle => {
                if apr_e || road || apr_w {
                    info!("GC{:02} activating (E={} road={} W={})", self.spec.id, apr_e, road, apr_w);
                    let _ = self.lamp_tx.send(LampCmd::Start(BellKind::Approach));
                    self.lamps = true;
                    // lamps flash for half a second before the gates stir
                    self.gate_delay = now + GATE_DELAY;
                    self.set_state(GradeState::GateLower);
                }
            }
            GradeState::GateLower => {
                if now >= self.gate_delay {
                    for &g in self.spec.gates {
                        gates.command(g, TurnoutPos::Close);
                    }
                    self.apr_timer = now + APPROACH_TIMEOUT;
                    self.set_state(GradeState::Approach);
                }
            }
            GradeState::Approach => {
                if road {
                    self.road_timer = now + ROAD_LINGER;
                    // the road bell call site; a no-op unless enabled
                    let _ = self.lamp_tx.send(LampCmd::Start(BellKind::Road));
                    self.set_state(GradeState::Road);
                } else if now >= self.apr_timer {
                    self.enter_gate_raise(now, gates);
                }
            }
            GradeState::Road => {
                if road {
                    self.road_timer = now + ROAD_LINGER;
                } else if now >= self.road_timer {
                    self.enter_gate_raise(now, gates);
                }
            }
            GradeState::GateRaise => {
                let done = match self.pending_gate {
                    Some(g) => gates.is_idle(g),
                    None => now >= self.dep_timer,
                };
                if done {
                    self.pending_gate = None;
                    self.dep_timer = now + DEPART_LINGER;
                    let _ = self.lamp_tx.send(LampCmd::Stop);
                    self.lamps = false;
                    self.set_state(GradeState::Depart);
                }
            }
            GradeState::Depart => {
                if road {
                    // train backed up onto the road: start over clean
                    info!("GC{:02} road hit during departure, resetting", self.spec.id);
                    self.set_state(GradeState::Idle);
                } else if apr_e || apr_w {
                    self.dep_timer = now + DEPART_LINGER;
                } else if now >= self.dep_timer {
                    self.set_state(GradeState::Idle);
                }
            }
        }
    }

    /// Snapshot field: Open/Closed from the first gate, `none` without
    /// gates.
    pub fn gate_word(&self, closed: impl Fn(usize) -> bool) -> &'static str {
        match self.spec.gates.first() {
            None => "none",
            Some(&g) => {
                if closed(g) {
                    "Closed"
                } else {
                    "Open"
                }
            }
        }
    }
}

/// Spawn a crossing's lamp/bell worker. While running it recolors the
/// crossing's flasher pair every ~0.8 s and keeps exactly one bell-enable
/// bit up via read-modify-write on the panel chip's output latch.
pub fn spawn_lamp(
    spec: &'static CrossingSpec,
    signal_tx: Sender<SignalCmd>,
    bus: SharedBus,
    panel: Mcp23017,
) -> (Sender<LampCmd>, JoinHandle<()>) {
    let (tx, rx) = unbounded::<LampCmd>();
    let handle = thread::Builder::new()
        .name(format!("gc{:02}-lamps", spec.id))
        .spawn(move || {
            let bell_mask = (1 << spec.bells.approach) | (1 << spec.bells.road);
            let mut running = false;
            let mut phase_red = true;
            let set_bells = |bits: u8| {
                let mut guard = bus.lock().unwrap();
                if let Err(e) = panel.olat_rmw(&mut guard, Port::B, bell_mask, bits) {
                    warn!("GC{:02} bell latch: {}", spec.id, e);
                }
            };
            loop {
                match rx.recv_timeout(LAMP_PERIOD) {
                    Ok(LampCmd::Start(kind)) => {
                        running = true;
                        phase_red = true;
                        send_color(&signal_tx, spec.lamp_signal, Color::Red);
                        match kind {
                            BellKind::Approach => set_bells(1 << spec.bells.approach),
                            BellKind::Road if BELL_ROAD_ENABLED => {
                                set_bells(1 << spec.bells.road)
                            }
                            // wired but disabled: leave whatever bell is
                            // ringing alone
                            BellKind::Road => {}
                        }
                    }
                    Ok(LampCmd::Stop) => {
                        running = false;
                        send_color(&signal_tx, spec.lamp_signal, Color::Off);
                        set_bells(0);
                    }
                    Ok(LampCmd::Quit) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if running {
                            phase_red = !phase_red;
                            let c = if phase_red { Color::Red } else { Color::Green };
                            send_color(&signal_tx, spec.lamp_signal, c);
                        }
                    }
                }
            }
            // leave the crossing dark and quiet
            send_color(&signal_tx, spec.lamp_signal, Color::Off);
            set_bells(0);
            info!("GC{:02} lamp task stopped", spec.id);
        })
        .expect("spawning lamp thread");
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::CROSSINGS;
    use crate::sensors::SensorSnapshot;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakeGates {
        commanded: Vec<(usize, TurnoutPos)>,
        idle: HashMap<usize, bool>,
    }

    impl FakeGates {
        fn new() -> Self { FakeGates { commanded: Vec::new(), idle: HashMap::new() } }
    }

    impl GateOps for FakeGates {
        fn command(&mut self, turnout: usize, pos: TurnoutPos) {
            self.commanded.push((turnout, pos));
            self.idle.insert(turnout, false);
        }

        fn is_idle(&mut self, turnout: usize) -> bool {
            *self.idle.get(&turnout).unwrap_or(&true)
        }
    }

    fn snap_bits(bits: &[usize]) -> SensorSnapshot {
        let mut s = SensorSnapshot::default();
        for &b in bits {
            if b < 16 {
                s.state1 |= 1 << b;
            } else {
                s.state2 |= 1 << (b - 16);
            }
        }
        s
    }

    fn gated_crossing() -> (Crossing, crossbeam_channel::Receiver<LampCmd>) {
        let (tx, rx) = unbounded();
        (Crossing::new(&CROSSINGS[1], tx), rx)
    }

    #[test]
    fn happy_path_with_gates() {
        let (mut gc, lamp_rx) = gated_crossing();
        let mut gates = FakeGates::new();
        let spec = gc.spec;
        let t0 = Instant::now();

        // approach sensor fires
        gc.tick(&snap_bits(&[spec.apr_east]), t0, &mut gates);
        assert_eq!(gc.state, GradeState::GateLower);
        assert!(matches!(lamp_rx.try_recv(), Ok(LampCmd::Start(BellKind::Approach))));
        assert!(gates.commanded.is_empty());

        // gate delay elapses: gates commanded closed
        gc.tick(&snap_bits(&[spec.apr_east]), t0 + Duration::from_millis(600), &mut gates);
        assert_eq!(gc.state, GradeState::Approach);
        assert_eq!(gates.commanded, vec![(31, TurnoutPos::Close), (32, TurnoutPos::Close)]);

        // road sensor: road state
        gc.tick(&snap_bits(&[spec.road]), t0 + Duration::from_secs(2), &mut gates);
        assert_eq!(gc.state, GradeState::Road);

        // road clear but linger window still open
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(2500), &mut gates);
        assert_eq!(gc.state, GradeState::Road);

        // linger expired: gates rise
        gates.commanded.clear();
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(3100), &mut gates);
        assert_eq!(gc.state, GradeState::GateRaise);
        assert_eq!(gates.commanded, vec![(31, TurnoutPos::Open), (32, TurnoutPos::Open)]);

        // first gate still moving: stay
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(3200), &mut gates);
        assert_eq!(gc.state, GradeState::GateRaise);

        // gate 31 settles: departure window arms, lamps stop
        gates.idle.insert(31, true);
        while let Ok(_) = lamp_rx.try_recv() {}
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(3300), &mut gates);
        assert_eq!(gc.state, GradeState::Depart);
        assert!(matches!(lamp_rx.try_recv(), Ok(LampCmd::Stop)));

        // a second later, all quiet: idle
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(4400), &mut gates);
        assert_eq!(gc.state, GradeState::Idle);
    }

    #[test]
    fn approach_times_out_without_road() {
        let (mut gc, _lamp_rx) = gated_crossing();
        let mut gates = FakeGates::new();
        let spec = gc.spec;
        let t0 = Instant::now();
        gc.tick(&snap_bits(&[spec.apr_west]), t0, &mut gates);
        gc.tick(&snap_bits(&[spec.apr_west]), t0 + Duration::from_millis(600), &mut gates);
        assert_eq!(gc.state, GradeState::Approach);
        // stalled train never reaches the road; the 10 s watchdog raises
        gc.tick(&snap_bits(&[]), t0 + Duration::from_secs(11), &mut gates);
        assert_eq!(gc.state, GradeState::GateRaise);
    }

    #[test]
    fn backed_up_train_resets_from_depart() {
        let (mut gc, _lamp_rx) = gated_crossing();
        let mut gates = FakeGates::new();
        let spec = gc.spec;
        let t0 = Instant::now();
        gc.tick(&snap_bits(&[spec.apr_east]), t0, &mut gates);
        gc.tick(&snap_bits(&[spec.apr_east]), t0 + Duration::from_millis(600), &mut gates);
        gc.tick(&snap_bits(&[]), t0 + Duration::from_secs(11), &mut gates);
        gates.idle.insert(31, true);
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(11_100), &mut gates);
        assert_eq!(gc.state, GradeState::Depart);
        gc.tick(&snap_bits(&[spec.road]), t0 + Duration::from_millis(11_200), &mut gates);
        assert_eq!(gc.state, GradeState::Idle);
    }

    #[test]
    fn departing_train_refreshes_the_window() {
        let (mut gc, _lamp_rx) = gated_crossing();
        let mut gates = FakeGates::new();
        let spec = gc.spec;
        let t0 = Instant::now();
        gc.tick(&snap_bits(&[spec.apr_east]), t0, &mut gates);
        gc.tick(&snap_bits(&[spec.apr_east]), t0 + Duration::from_millis(600), &mut gates);
        gc.tick(&snap_bits(&[]), t0 + Duration::from_secs(11), &mut gates);
        gates.idle.insert(31, true);
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(11_100), &mut gates);
        assert_eq!(gc.state, GradeState::Depart);
        // west approach stays hot while the tail clears
        gc.tick(&snap_bits(&[spec.apr_west]), t0 + Duration::from_millis(12_000), &mut gates);
        assert_eq!(gc.state, GradeState::Depart);
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(12_500), &mut gates);
        assert_eq!(gc.state, GradeState::Depart);
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(13_100), &mut gates);
        assert_eq!(gc.state, GradeState::Idle);
    }

    #[test]
    fn gateless_crossing_lingers_then_departs() {
        let (tx, _rx) = unbounded();
        let mut gc = Crossing::new(&CROSSINGS[0], tx);
        let mut gates = FakeGates::new();
        let spec = gc.spec;
        let t0 = Instant::now();
        gc.tick(&snap_bits(&[spec.road]), t0, &mut gates);
        gc.tick(&snap_bits(&[spec.road]), t0 + Duration::from_millis(600), &mut gates);
        assert_eq!(gc.state, GradeState::Road);
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(1700), &mut gates);
        assert_eq!(gc.state, GradeState::GateRaise);
        assert!(gates.commanded.is_empty(), "no gate servos on this crossing");
        // lingers the seeded second, then departs
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(2000), &mut gates);
        assert_eq!(gc.state, GradeState::GateRaise);
        gc.tick(&snap_bits(&[]), t0 + Duration::from_millis(2800), &mut gates);
        assert_eq!(gc.state, GradeState::Depart);
    }

    #[test]
    fn gate_word_reflects_position() {
        let (mut gc, _rx) = gated_crossing();
        assert_eq!(gc.gate_word(|_| true), "Closed");
        assert_eq!(gc.gate_word(|_| false), "Open");
        let (tx, _rx2) = unbounded();
        gc = Crossing::new(&CROSSINGS[0], tx);
        assert_eq!(gc.gate_word(|_| true), "none");
    }
}
