//! The actuator surface the section controllers drive. The main loop
//! implements this over the mover/table/relay/sound plumbing; tests swap
//! in a recorder.

use crate::api::TurnoutPos;

pub trait LayoutCtl {
    fn move_turnout(&mut self, turnout: usize, pos: TurnoutPos);
    fn turnout_idle(&self, turnout: usize) -> bool;
    /// The commanded endpoint the servo is sitting at, None while moving
    /// or between endpoints.
    fn turnout_at(&self, turnout: usize) -> Option<TurnoutPos>;
    fn set_relay(&mut self, relay: usize, level: bool);
    fn set_lock_led(&mut self, on: bool);
    fn set_first_digit_led(&mut self, on: bool);
    fn play(&mut self, clip: &str);
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;

    /// Records everything and lets a test pin turnout states.
    pub struct FakeCtl {
        pub moves: Vec<(usize, TurnoutPos)>,
        pub relays: Vec<(usize, bool)>,
        pub clips: Vec<String>,
        pub lock_led: bool,
        pub first_digit_led: bool,
        pub positions: HashMap<usize, TurnoutPos>,
        pub busy: HashMap<usize, bool>,
    }

    impl FakeCtl {
        pub fn new() -> Self {
            FakeCtl {
                moves: Vec::new(),
                relays: Vec::new(),
                clips: Vec::new(),
                lock_led: false,
                first_digit_led: false,
                positions: HashMap::new(),
                busy: HashMap::new(),
            }
        }

        pub fn settle_all(&mut self) { self.busy.clear() }
    }

    impl LayoutCtl for FakeCtl {
        fn move_turnout(&mut self, turnout: usize, pos: TurnoutPos) {
            self.moves.push((turnout, pos));
            self.positions.insert(turnout, pos);
            self.busy.insert(turnout, true);
        }

        fn turnout_idle(&self, turnout: usize) -> bool {
            !self.busy.get(&turnout).copied().unwrap_or(false)
        }

        fn turnout_at(&self, turnout: usize) -> Option<TurnoutPos> {
            if !self.turnout_idle(turnout) {
                return None;
            }
            self.positions.get(&turnout).copied()
        }

        fn set_relay(&mut self, relay: usize, level: bool) { self.relays.push((relay, level)) }

        fn set_lock_led(&mut self, on: bool) { self.lock_led = on }

        fn set_first_digit_led(&mut self, on: bool) { self.first_digit_led = on }

        fn play(&mut self, clip: &str) { self.clips.push(clip.to_string()) }
    }
}
