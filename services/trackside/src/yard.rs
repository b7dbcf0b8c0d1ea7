//! Yard route execution. The operator keys two hex digits; the pair picks
//! a route out of the fixed table and the executor walks it one turnout
//! per main-loop tick, skipping points that already sit right. Keying the
//! reverse of the route just completed selects the lowercase mirror entry,
//! which retraces the identical physical path (and therefore moves
//! nothing if the yard is untouched).

use log::{info, warn};

use crate::api::TurnoutPos;
use crate::control::LayoutCtl;
use crate::layout::{self, yard_lookup};

struct InProgress {
    key: String,
    digits: (char, char),
    steps: &'static [(usize, TurnoutPos)],
    next: usize,
}

pub struct Yard {
    first_digit: Option<char>,
    last_route: Option<(char, char)>,
    running: Option<InProgress>,
}

impl Yard {
    pub fn new() -> Yard { Yard { first_digit: None, last_route: None, running: None } }

    pub fn active_key(&self) -> Option<&str> { self.running.as_ref().map(|r| r.key.as_str()) }

    pub fn last_route(&self) -> Option<(char, char)> { self.last_route }

    /// Table key for a digit pair: doubled digits are the composite
    /// "everything normal for this track" entries, a pair that reverses
    /// the previously completed route takes its mirror.
    fn select_key(&self, f: char, g: char) -> String {
        if f == g {
            return format!("X{}{}", f, g);
        }
        if self.last_route == Some((g, f)) {
            let mirror = format!("r{}{}", f, g);
            if yard_lookup(&mirror).is_some() {
                return mirror;
            }
        }
        format!("R{}{}", f, g)
    }

    pub fn key(&mut self, digit: char, ctl: &mut impl LayoutCtl) {
        if self.running.is_some() {
            warn!("yard keypad ignored, route {} still executing", self.active_key().unwrap());
            ctl.play(layout::CLIP_ERROR);
            return;
        }
        match self.first_digit.take() {
            None => {
                self.first_digit = Some(digit);
                ctl.set_first_digit_led(true);
            }
            Some(f) => {
                ctl.set_first_digit_led(false);
                let key = self.select_key(f, digit);
                match yard_lookup(&key) {
                    Some(steps) => {
                        info!("yard route {} started ({} steps)", key, steps.len());
                        self.running =
                            Some(InProgress { key, digits: (f, digit), steps, next: 0 });
                    }
                    None => {
                        warn!("no yard route for {}{} (tried {})", f, digit, key);
                        ctl.play(layout::CLIP_ERROR);
                    }
                }
            }
        }
    }

    /// One executor step per main-loop tick: at most one turnout is
    /// commanded; points already at position are skipped for free.
    pub fn step(&mut self, ctl: &mut impl LayoutCtl) {
        let Some(run) = self.running.as_mut() else { return };
        while run.next < run.steps.len() {
            let (turnout, pos) = run.steps[run.next];
            if ctl.turnout_at(turnout) == Some(pos) {
                run.next += 1;
                continue;
            }
            if !ctl.turnout_idle(turnout) {
                // still swinging from an earlier step; try again next tick
                return;
            }
            ctl.move_turnout(turnout, pos);
            run.next += 1;
            return;
        }
        info!("yard route {} complete", run.key);
        self.last_route = Some(run.digits);
        self.running = None;
    }
}
