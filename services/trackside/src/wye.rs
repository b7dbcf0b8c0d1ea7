//! Yard wye. T07 picks the leg, PR03 keeps the rail polarity matched to
//! it. S7 on the B6 approach aligns polarity with however the points
//! already sit; S8 and S9 at the two legs force the matching point
//! position and polarity for the return move. Every sensor decides once
//! per transit thanks to a short re-trigger suppression.

use std::time::Instant;

use log::info;

use crate::api::{TurnoutPos, WYE_SUPPRESS};
use crate::control::LayoutCtl;
use crate::layout::{self, RELAY_PR03, WYE_TURNOUT};
use crate::sensors::SensorSnapshot;

pub struct Wye {
    s7_until: Instant,
    s8_until: Instant,
    s9_until: Instant,
    last_polarity: bool,
}

impl Wye {
    pub fn new() -> Wye {
        let now = Instant::now();
        Wye { s7_until: now, s8_until: now, s9_until: now, last_polarity: false }
    }

    fn set_polarity(&mut self, level: bool, ctl: &mut impl LayoutCtl) {
        ctl.set_relay(RELAY_PR03, level);
        self.last_polarity = level;
    }

    pub fn tick(&mut self, snap: &SensorSnapshot, now: Instant, ctl: &mut impl LayoutCtl) {
        if snap.bit(layout::SENSOR_S7) && now >= self.s7_until {
            self.s7_until = now + WYE_SUPPRESS;
            // polarity follows the points as they already stand
            match ctl.turnout_at(WYE_TURNOUT) {
                Some(TurnoutPos::Close) => self.set_polarity(false, ctl),
                Some(TurnoutPos::Open) => self.set_polarity(true, ctl),
                _ => {
                    // points unsettled: re-assert the last decision
                    info!("wye approach with T07 unsettled");
                    let last = self.last_polarity;
                    self.set_polarity(last, ctl);
                }
            }
        }
        if snap.bit(layout::SENSOR_S8) && now >= self.s8_until {
            self.s8_until = now + WYE_SUPPRESS;
            info!("wye east leg transit");
            if ctl.turnout_at(WYE_TURNOUT) != Some(TurnoutPos::Close) {
                ctl.move_turnout(WYE_TURNOUT, TurnoutPos::Close);
            }
            self.set_polarity(false, ctl);
        }
        if snap.bit(layout::SENSOR_S9) && now >= self.s9_until {
            self.s9_until = now + WYE_SUPPRESS;
            info!("wye west leg transit");
            if ctl.turnout_at(WYE_TURNOUT) != Some(TurnoutPos::Open) {
                ctl.move_turnout(WYE_TURNOUT, TurnoutPos::Open);
            }
            self.set_polarity(true, ctl);
        }
    }

    /// Panel buttons: explicit leg selection with matching polarity.
    /// Ignored while the points are moving or a transit was just decided.
    pub fn button(&mut self, open: bool, now: Instant, ctl: &mut impl LayoutCtl) {
        if !ctl.turnout_idle(WYE_TURNOUT) {
            info!("wye button ignored, T07 in motion");
            return;
        }
        if now < self.s7_until || now < self.s8_until || now < self.s9_until {
            info!("wye button ignored, transit just decided");
            return;
        }
        let (pos, pol) = if open { (TurnoutPos::Open, true) } else { (TurnoutPos::Close, false) };
        if ctl.turnout_at(WYE_TURNOUT) != Some(pos) {
            ctl.move_turnout(WYE_TURNOUT, pos);
        }
        self.set_polarity(pol, ctl);
        info!("wye set {:?} by operator", pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fake::FakeCtl;
    use std::time::Duration;

    fn snap_sensor(bit: usize) -> SensorSnapshot {
        let mut s = SensorSnapshot::default();
        s.state2 |= 1 << (bit - 16);
        s
    }

    #[test]
    fn approach_matches_polarity_to_points() {
        let mut wye = Wye::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(WYE_TURNOUT, TurnoutPos::Open);
        wye.tick(&snap_sensor(layout::SENSOR_S7), Instant::now(), &mut ctl);
        assert_eq!(ctl.relays, vec![(RELAY_PR03, true)]);
        assert!(ctl.moves.is_empty());
    }

    #[test]
    fn legs_force_position_and_polarity() {
        let mut wye = Wye::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(WYE_TURNOUT, TurnoutPos::Open);
        let t0 = Instant::now();
        wye.tick(&snap_sensor(layout::SENSOR_S8), t0, &mut ctl);
        assert_eq!(ctl.moves, vec![(WYE_TURNOUT, TurnoutPos::Close)]);
        assert_eq!(ctl.relays, vec![(RELAY_PR03, false)]);

        ctl.settle_all();
        ctl.moves.clear();
        ctl.relays.clear();
        wye.tick(&snap_sensor(layout::SENSOR_S9), t0 + Duration::from_secs(5), &mut ctl);
        assert_eq!(ctl.moves, vec![(WYE_TURNOUT, TurnoutPos::Open)]);
        assert_eq!(ctl.relays, vec![(RELAY_PR03, true)]);
    }

    #[test]
    fn retrigger_suppression_decides_once_per_transit() {
        let mut wye = Wye::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(WYE_TURNOUT, TurnoutPos::Open);
        let t0 = Instant::now();
        wye.tick(&snap_sensor(layout::SENSOR_S8), t0, &mut ctl);
        ctl.settle_all();
        ctl.moves.clear();
        // wheels keep hitting S8 for the next second: no new decision
        wye.tick(&snap_sensor(layout::SENSOR_S8), t0 + Duration::from_millis(500), &mut ctl);
        wye.tick(&snap_sensor(layout::SENSOR_S8), t0 + Duration::from_millis(1500), &mut ctl);
        assert!(ctl.moves.is_empty());
    }

    #[test]
    fn button_ignored_during_suppression_or_motion() {
        let mut wye = Wye::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(WYE_TURNOUT, TurnoutPos::Open);
        let t0 = Instant::now();
        wye.tick(&snap_sensor(layout::SENSOR_S8), t0, &mut ctl);
        // T07 still swinging: ignored
        ctl.relays.clear();
        wye.button(true, t0 + Duration::from_millis(100), &mut ctl);
        assert!(ctl.relays.is_empty());
        ctl.settle_all();
        // settled but inside the transit suppression: still ignored
        wye.button(true, t0 + Duration::from_millis(300), &mut ctl);
        assert!(ctl.relays.is_empty());
        // clear of both: honored
        wye.button(true, t0 + Duration::from_secs(3), &mut ctl);
        assert_eq!(ctl.moves.last(), Some(&(WYE_TURNOUT, TurnoutPos::Open)));
        assert_eq!(ctl.relays, vec![(RELAY_PR03, true)]);
    }
}
