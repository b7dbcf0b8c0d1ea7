//! Block occupancy to signal colors. Three passes over the occupied
//! blocks, green first, red last, so the surviving color for a head is the
//! highest-priority demand on it. Wayside heads recolor directly through
//! the shift register; semaphore heads go through the servo flow: lamp
//! out, flag to position, lamp back on, and only then does the head count
//! as recolored.

use crossbeam_channel::Sender;
use log::debug;

use crate::api::{Color, SignalCmd, TurnoutPos};
use crate::layout::{SignalKind, ASPECT_RULES, NUM_SIGNALS, SIGNALS};
use crate::sensors::SensorSnapshot;
use crate::signals::{send_color, SignalTable};
use crate::turnout::{Movers, TurnoutTable};

pub fn desired_colors(snap: &SensorSnapshot) -> [Color; NUM_SIGNALS] {
    let mut desired = [Color::Off; NUM_SIGNALS];
    let occupied: Vec<usize> = snap.occupied_blocks().collect();
    for (color, pick) in [
        (Color::Green, 0usize),
        (Color::Yellow, 1),
        (Color::Red, 2),
    ] {
        for &block in &occupied {
            let rule = &ASPECT_RULES[block - 1];
            let list = match pick {
                0 => rule.green,
                1 => rule.yellow,
                _ => rule.red,
            };
            for &sig in list {
                desired[sig - 1] = color;
            }
        }
    }
    desired
}

fn flag_pos(color: Color) -> Option<TurnoutPos> {
    match color {
        Color::Green => Some(TurnoutPos::Open),
        Color::Yellow => Some(TurnoutPos::Middle),
        Color::Red => Some(TurnoutPos::Close),
        Color::Off => None,
    }
}

struct SemState {
    signal: usize,
    turnout: usize,
    pending: Option<Color>,
    issued: bool,
}

/// Flag-board signal coordination. At most one color change is in flight
/// per semaphore; a newer demand replaces the pending one and the flow
/// re-converges on the latest.
pub struct Semaphores {
    entries: Vec<SemState>,
}

impl Semaphores {
    pub fn new() -> Semaphores {
        let entries = SIGNALS
            .iter()
            .filter_map(|s| match s.kind {
                SignalKind::Semaphore(t) => {
                    Some(SemState { signal: s.index, turnout: t, pending: None, issued: false })
                }
                _ => None,
            })
            .collect();
        Semaphores { entries }
    }

    fn request(
        &mut self,
        signal: usize,
        color: Color,
        sigtable: &SignalTable,
        tx: &Sender<SignalCmd>,
    ) {
        let e = self.entries.iter_mut().find(|e| e.signal == signal).expect("not a semaphore");
        if e.pending == Some(color) {
            return;
        }
        if e.pending.is_none() && sigtable.color(signal) == color {
            return;
        }
        debug!("L{:02} semaphore flag to {:?}", signal, color);
        // lamp goes dark for the whole swing
        send_color(tx, signal, Color::Off);
        e.pending = Some(color);
        e.issued = false;
    }

    /// Advance every in-flight flow. Called once per tick after the motion
    /// events have been pumped.
    pub fn poll(
        &mut self,
        movers: &mut Movers,
        table: &mut TurnoutTable,
        sigtable: &mut SignalTable,
        tx: &Sender<SignalCmd>,
    ) {
        for e in &mut self.entries {
            let Some(color) = e.pending else { continue };
            if !table.get(e.turnout).is_idle() {
                continue;
            }
            if !e.issued {
                if let Some(pos) = flag_pos(color) {
                    movers.move_to(table, e.turnout, pos);
                }
                e.issued = true;
                // an AlreadyInPosition move leaves the turnout idle, so
                // fall through and finish in the same tick
                if !table.get(e.turnout).is_idle() {
                    continue;
                }
            }
            if color != Color::Off {
                send_color(tx, e.signal, color);
            }
            sigtable.record(e.signal, color);
            e.pending = None;
            e.issued = false;
            debug!("L{:02} semaphore now {:?}", e.signal, color);
        }
    }
}

/// The per-tick signal update: recompute every head's demand and dispatch
/// the ones that changed.
pub fn apply(
    snap: &SensorSnapshot,
    sigtable: &mut SignalTable,
    semaphores: &mut Semaphores,
    movers: &mut Movers,
    table: &mut TurnoutTable,
    tx: &Sender<SignalCmd>,
) {
    let desired = desired_colors(snap);
    for spec in SIGNALS.iter() {
        match spec.kind {
            SignalKind::Wayside => sigtable.set(spec.index, desired[spec.index - 1], tx),
            SignalKind::Semaphore(_) => {
                semaphores.request(spec.index, desired[spec.index - 1], sigtable, tx)
            }
            // crossing flashers belong to their lamp tasks, spares stay dark
            SignalKind::Crossing | SignalKind::Spare => {}
        }
    }
    semaphores.poll(movers, table, sigtable, tx);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap_blocks(blocks: &[usize]) -> SensorSnapshot {
        let mut s = SensorSnapshot::default();
        for &b in blocks {
            s.state1 |= 1 << (b - 1);
        }
        s
    }

    #[test]
    fn empty_layout_is_all_dark() {
        let desired = desired_colors(&snap_blocks(&[]));
        assert!(desired.iter().all(|&c| c == Color::Off));
    }

    #[test]
    fn multi_block_priority() {
        // occupied B3 and B4: the canonical interference case
        let desired = desired_colors(&snap_blocks(&[3, 4]));
        let expect = [
            (1, Color::Red),
            (2, Color::Red), // B4 wants yellow here, B3's red wins
            (3, Color::Red),
            (4, Color::Red),
            (5, Color::Green),
            (6, Color::Yellow),
            (7, Color::Green),
            (8, Color::Yellow),
            (9, Color::Off),
            (10, Color::Off),
            (11, Color::Off),
            (12, Color::Off),
        ];
        for (sig, color) in expect {
            assert_eq!(desired[sig - 1], color, "L{:02}", sig);
        }
    }

    #[test]
    fn red_beats_yellow_beats_green_everywhere() {
        // drive every pairwise combination and verify no lower color ever
        // survives where a higher one is demanded
        for a in 1..=10usize {
            for b in 1..=10usize {
                let desired = desired_colors(&snap_blocks(&[a, b]));
                for sig in 1..=12usize {
                    let ra = &ASPECT_RULES[a - 1];
                    let rb = &ASPECT_RULES[b - 1];
                    let wants_red = ra.red.contains(&sig) || rb.red.contains(&sig);
                    let wants_yellow = ra.yellow.contains(&sig) || rb.yellow.contains(&sig);
                    let wants_green = ra.green.contains(&sig) || rb.green.contains(&sig);
                    let expect = if wants_red {
                        Color::Red
                    } else if wants_yellow {
                        Color::Yellow
                    } else if wants_green {
                        Color::Green
                    } else {
                        Color::Off
                    };
                    assert_eq!(desired[sig - 1], expect, "B{} B{} L{:02}", a, b, sig);
                }
            }
        }
    }

    #[test]
    fn crossing_flashers_never_get_aspect_demands() {
        for b in 1..=10usize {
            let desired = desired_colors(&snap_blocks(&[b]));
            assert_eq!(desired[12], Color::Off); // L13
            assert_eq!(desired[13], Color::Off); // L14
        }
    }
}
