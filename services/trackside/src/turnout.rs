//! Turnout table and servo motion. Each movement runs in its own stepper
//! thread that owns the turnout's PWM channel for the duration; the main
//! loop is the sole writer of the table and updates it from the steppers'
//! completion events. A turnout is in flight exactly while its motion
//! handle is present.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use railhal::pca9685::Pca9685;
use railhal::SharedBus;

use crate::api::{
    MotionEvent, MotionOutcome, TurnoutKind, TurnoutPos, MOTION_STEPS_PER_SEC, MOTION_TICK,
    MOTION_WAIT,
};

use crate::calib::CalRecord;
use crate::layout::{self, NUM_TURNOUTS, SERVO_BOARDS};

/// How long a cancelled stepper gets to send its final event; it sleeps at
/// most one motion tick at a time, so this is generous.
const CANCEL_ACK_WAIT: std::time::Duration = std::time::Duration::from_secs(1);

pub struct Turnout {
    pub index: usize,
    pub label: String,
    pub kind: TurnoutKind,
    pub addr: u8,
    pub channel: u8,
    pub current: u16,
    pub rate: u16,
    pub open: u16,
    pub middle: u16,
    pub close: u16,
    pub min: u16,
    pub max: u16,
    motion: Option<MotionHandle>,
}

struct MotionHandle {
    cancel: Arc<AtomicBool>,
    started: Instant,
}

impl Turnout {
    fn from_record(rec: &CalRecord) -> Turnout {
        let spec = layout::turnout_spec(rec.index);
        Turnout {
            index: rec.index,
            label: rec.id.clone(),
            kind: spec.kind,
            addr: rec.addr,
            channel: rec.channel,
            current: rec.pos,
            rate: rec.rate,
            open: rec.open,
            middle: rec.middle,
            close: rec.close,
            min: rec.min,
            max: rec.max,
            motion: None,
        }
    }

    pub fn endpoint(&self, pos: TurnoutPos) -> u16 {
        match pos {
            TurnoutPos::Open => self.open,
            TurnoutPos::Middle => self.middle,
            TurnoutPos::Close => self.close,
        }
    }

    pub fn is_idle(&self) -> bool { self.motion.is_none() }

    /// Which commanded position the servo is sitting at, if any.
    pub fn at_pos(&self) -> Option<TurnoutPos> {
        if !self.is_idle() {
            return None;
        }
        for p in [TurnoutPos::Open, TurnoutPos::Middle, TurnoutPos::Close] {
            if self.current == self.endpoint(p) {
                return Some(p);
            }
        }
        None
    }

    pub fn to_record(&self) -> CalRecord {
        CalRecord {
            index: self.index,
            addr: self.addr,
            channel: self.channel,
            pos: self.current,
            rate: self.rate,
            open: self.open,
            middle: self.middle,
            close: self.close,
            min: self.min,
            max: self.max,
            id: self.label.clone(),
        }
    }
}

pub struct TurnoutTable {
    entries: Vec<Turnout>,
}

impl TurnoutTable {
    pub fn from_records(records: &[CalRecord]) -> TurnoutTable {
        TurnoutTable { entries: records.iter().map(Turnout::from_record).collect() }
    }

    pub fn get(&self, index: usize) -> &Turnout { &self.entries[index - 1] }

    fn get_mut(&mut self, index: usize) -> &mut Turnout { &mut self.entries[index - 1] }

    pub fn iter(&self) -> impl Iterator<Item = &Turnout> { self.entries.iter() }

    pub fn records(&self) -> Vec<CalRecord> { self.entries.iter().map(Turnout::to_record).collect() }
}

/// Ambient temperature correction for mechanical signal devices: one pulse
/// unit per ~3 °C around a 21 °C center.
pub fn temp_offset(temp_c: f32) -> i32 { ((21.0 - temp_c) / -3.0).floor() as i32 }

/// The per-servo sign depends on which way the horn was mounted: a servo
/// whose open endpoint is the higher pulse corrects one way, its mirror
/// corrects the other.
fn compensated_target(t: &Turnout, target: u16, offset: i32) -> u16 {
    let corrected = match t.kind {
        TurnoutKind::Point => target as i32,
        TurnoutKind::Gate | TurnoutKind::Semaphore => {
            if t.open >= t.close {
                target as i32 + offset
            } else {
                target as i32 - offset
            }
        }
    };
    corrected.clamp(t.min as i32, t.max as i32) as u16
}

/// One 20 ms step toward the target, clamped at the target on the last
/// step.
fn next_pulse(current: u16, target: u16, step: u16) -> u16 {
    if current < target {
        (current + step).min(target)
    } else {
        current.saturating_sub(step).max(target)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveResult {
    AlreadyInPosition,
    Started,
    /// A prior motion overstayed the wait window and was cancelled.
    Replaced,
}

/// Owns the servo boards and all in-flight motion bookkeeping. Lives in
/// the main loop next to the table.
pub struct Movers {
    bus: SharedBus,
    boards: Vec<Pca9685>,
    events_tx: Sender<MotionEvent>,
    events_rx: Receiver<MotionEvent>,
    temp_offset: i32,
}

impl Movers {
    pub fn new(bus: SharedBus) -> Movers {
        let mut boards = Vec::new();
        {
            let mut guard = bus.lock().unwrap();
            for addr in SERVO_BOARDS {
                let mut b = Pca9685::new(addr);
                if let Err(e) = b.init(&mut guard) {
                    warn!("servo board 0x{:02x} init: {}", addr, e);
                }
                boards.push(b);
            }
        }
        let (events_tx, events_rx) = unbounded();
        Movers { bus, boards, events_tx, events_rx, temp_offset: 0 }
    }

    pub fn set_temp_offset(&mut self, offset: i32) {
        if offset != self.temp_offset {
            info!("temperature compensation now {:+} pulse units", offset);
            self.temp_offset = offset;
        }
    }

    fn board(&self, addr: u8) -> &Pca9685 {
        self.boards.iter().find(|b| b.addr() == addr).expect("unknown servo board address")
    }

    /// Drain completion events and update the table authoritatively.
    pub fn pump(&mut self, table: &mut TurnoutTable) {
        while let Ok(ev) = self.events_rx.try_recv() {
            let t = table.get_mut(ev.turnout);
            t.current = ev.final_pulse;
            t.motion = None;
            match ev.outcome {
                MotionOutcome::Completed => {}
                MotionOutcome::Cancelled => {
                    info!("T{:02} motion cancelled at {}", ev.turnout, ev.final_pulse)
                }
                MotionOutcome::BusFault => {
                    error!("T{:02} motion aborted at {} on bus fault", ev.turnout, ev.final_pulse)
                }
            }
        }
    }

    /// Block (pumping events) until the turnout is idle or the window
    /// closes. Returns true when idle.
    pub fn wait_idle(
        &mut self,
        table: &mut TurnoutTable,
        index: usize,
        window: std::time::Duration,
    ) -> bool {
        let deadline = Instant::now() + window;
        loop {
            self.pump(table);
            if table.get(index).is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(MOTION_TICK);
        }
    }

    /// Command a turnout to an endpoint. Gates and semaphores get the
    /// ambient correction applied to the target before the hard-limit
    /// clamp.
    pub fn move_to(
        &mut self,
        table: &mut TurnoutTable,
        index: usize,
        pos: TurnoutPos,
    ) -> MoveResult {
        self.pump(table);

        let mut result = MoveResult::Started;
        if !table.get(index).is_idle() {
            if !self.wait_idle(table, index, MOTION_WAIT) {
                // prior mover has overstayed its welcome
                if let Some(h) = table.get(index).motion.as_ref() {
                    h.cancel.store(true, Ordering::Relaxed);
                    error!(
                        "T{:02} motion still in flight after {:?} (started {:?} ago), replacing it",
                        index,
                        MOTION_WAIT,
                        h.started.elapsed()
                    );
                }
                // the stepper acknowledges the cancel with its final event,
                // which clears the handle and settles `current`
                if !self.wait_idle(table, index, CANCEL_ACK_WAIT) {
                    warn!("T{:02} stepper did not acknowledge cancel, dropping its handle", index);
                    table.get_mut(index).motion = None;
                }
                result = MoveResult::Replaced;
            }
        }

        let t = table.get(index);
        let target = compensated_target(t, t.endpoint(pos), self.temp_offset);
        if target == t.current {
            return MoveResult::AlreadyInPosition;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let stepper = Stepper {
            bus: Arc::clone(&self.bus),
            board: self.board(t.addr).clone(),
            turnout: index,
            channel: t.channel,
            from: t.current,
            to: target,
            step: (t.rate / MOTION_STEPS_PER_SEC).max(1),
            cancel: Arc::clone(&cancel),
            events: self.events_tx.clone(),
        };
        table.get_mut(index).motion = Some(MotionHandle { cancel, started: Instant::now() });
        thread::Builder::new()
            .name(format!("mover-T{:02}", index))
            .spawn(move || stepper.run())
            .expect("spawning mover thread");
        result
    }

    /// Direct single-pulse write used by the servo-adjust mode. No
    /// stepping, but the table stays authoritative.
    pub fn nudge(&mut self, table: &mut TurnoutTable, index: usize, pulse: u16) {
        self.pump(table);
        if !table.get(index).is_idle() {
            warn!("T{:02} busy, nudge ignored", index);
            return;
        }
        let (addr, channel) = {
            let t = table.get(index);
            (t.addr, t.channel)
        };
        let write = {
            let mut bus = self.bus.lock().unwrap();
            self.board(addr).set_channel_pulse(&mut bus, channel, pulse)
        };
        match write {
            Ok(()) => table.get_mut(index).current = pulse,
            Err(e) => warn!("T{:02} nudge: {}", index, e),
        }
    }

    /// Drive every channel to its table position in one pass. Run once at
    /// startup so the physical servos agree with the calibration file
    /// before any motion logic makes assumptions.
    pub fn energize(&mut self, table: &TurnoutTable) {
        let mut bus = self.bus.lock().unwrap();
        for t in table.iter() {
            let board = self.boards.iter().find(|b| b.addr() == t.addr);
            if let Some(b) = board {
                if let Err(e) = b.set_channel_pulse(&mut bus, t.channel, t.current) {
                    warn!("energizing T{:02}: {}", t.index, e);
                }
            }
        }
        info!("all servo channels driven to saved positions");
    }

    /// Release the servo pulses on every board (shutdown step).
    pub fn release_all(&mut self) {
        let mut bus = self.bus.lock().unwrap();
        for b in &self.boards {
            if let Err(e) = b.all_off(&mut bus) {
                warn!("releasing board 0x{:02x}: {}", b.addr(), e);
            }
        }
    }
}

struct Stepper {
    bus: SharedBus,
    board: Pca9685,
    turnout: usize,
    channel: u8,
    from: u16,
    to: u16,
    step: u16,
    cancel: Arc<AtomicBool>,
    events: Sender<MotionEvent>,
}

impl Stepper {
    fn run(self) {
        let mut current = self.from;
        let mut outcome = MotionOutcome::Completed;
        while current != self.to {
            if self.cancel.load(Ordering::Relaxed) {
                outcome = MotionOutcome::Cancelled;
                break;
            }
            let next = next_pulse(current, self.to, self.step);
            let write = {
                let mut bus = self.bus.lock().unwrap();
                self.board.set_channel_pulse(&mut bus, self.channel, next)
            };
            match write {
                Ok(()) => current = next,
                Err(e) => {
                    // leave current at the last pulse that actually made it out
                    warn!("T{:02} channel write failed: {}", self.turnout, e);
                    outcome = MotionOutcome::BusFault;
                    break;
                }
            }
            thread::sleep(MOTION_TICK);
        }
        let _ = self.events.send(MotionEvent {
            turnout: self.turnout,
            final_pulse: current,
            outcome,
        });
    }
}

/// Sanity pass run at startup after the calibration file is merged in.
pub fn check_invariants(table: &TurnoutTable) -> bool {
    let mut ok = true;
    for t in table.iter() {
        if t.current < t.min || t.current > t.max {
            error!("T{:02} position {} outside {}..={}", t.index, t.current, t.min, t.max);
            ok = false;
        }
    }
    ok && table.iter().count() == NUM_TURNOUTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib;

    fn table() -> TurnoutTable { TurnoutTable::from_records(&calib::defaults()) }

    #[test]
    fn step_clamps_at_target_both_directions() {
        assert_eq!(next_pulse(450, 750, 4), 454);
        assert_eq!(next_pulse(748, 750, 4), 750);
        assert_eq!(next_pulse(750, 450, 4), 746);
        assert_eq!(next_pulse(452, 450, 4), 450);
        assert_eq!(next_pulse(450, 450, 4), 450);
    }

    #[test]
    fn offset_mapping_centers_at_21c() {
        assert_eq!(temp_offset(21.0), 0);
        assert_eq!(temp_offset(24.0), 1);
        assert_eq!(temp_offset(27.5), 2);
        assert_eq!(temp_offset(18.0), -1);
        assert_eq!(temp_offset(14.9), -3);
    }

    #[test]
    fn compensation_skips_plain_points() {
        let tbl = table();
        let t = tbl.get(1);
        assert_eq!(compensated_target(t, t.open, 3), t.open);
    }

    #[test]
    fn compensation_symmetry() {
        // two gate servos with mirrored endpoints correct in opposite
        // directions by the same magnitude
        let tbl = table();
        let mut a = Turnout::from_record(&tbl.get(31).to_record());
        let mut b = Turnout::from_record(&tbl.get(31).to_record());
        a.open = 780;
        a.close = 420;
        b.open = 420;
        b.close = 780;
        for offset in [-3, -1, 0, 1, 3] {
            let da = compensated_target(&a, 600, offset) as i32 - 600;
            let db = compensated_target(&b, 600, offset) as i32 - 600;
            assert_eq!(da, -db, "offset {}", offset);
            assert_eq!(da.abs(), offset.abs());
        }
    }

    #[test]
    fn compensation_respects_hard_limits() {
        let tbl = table();
        let t = tbl.get(31); // gate, open 780 max 820
        assert_eq!(compensated_target(t, t.open, 100), t.max);
        assert_eq!(compensated_target(t, t.close, -100), t.min);
    }

    #[test]
    fn at_pos_reports_endpoints_only() {
        let mut tbl = table();
        tbl.get_mut(5).current = tbl.get(5).open;
        assert_eq!(tbl.get(5).at_pos(), Some(TurnoutPos::Open));
        tbl.get_mut(5).current = tbl.get(5).open + 1;
        assert_eq!(tbl.get(5).at_pos(), None);
    }

    #[test]
    fn record_round_trip_preserves_motion_values() {
        let tbl = table();
        let rec = tbl.get(12).to_record();
        let back = Turnout::from_record(&rec);
        assert_eq!(back.current, rec.pos);
        assert_eq!(back.rate, rec.rate);
        assert_eq!(back.label, rec.id);
    }

    #[test]
    fn startup_invariants_hold_for_defaults() {
        assert!(check_invariants(&table()));
    }
}
