//! Midway spring-turnout automation. T05 and T06 swing to their active
//! position when a train trips the associated sensor and drift back to
//! the inactive position once traffic stops for a while. The panel
//! buttons toggle them by hand; a quick second press pins the active
//! position until the next single press. Both may never be pinned at
//! once: that alignment derails anything entering the ladder.

use std::time::Instant;

use log::info;

use crate::api::{Press, MIDWAY_LOCK_WINDOW, MIDWAY_RESET_DELAY, WYE_SUPPRESS};
use crate::control::LayoutCtl;
use crate::layout::{self, MidwaySpec};
use crate::sensors::SensorSnapshot;

struct Entry {
    spec: &'static MidwaySpec,
    manual_set: bool,
    locked: bool,
    reset_at: Instant,
    /// Buttons are ignored for a short window after a transit.
    suppress_until: Instant,
    last_single: Option<Instant>,
}

pub struct Midway {
    entries: Vec<Entry>,
}

impl Midway {
    pub fn new() -> Midway {
        let now = Instant::now();
        Midway {
            entries: layout::MIDWAY
                .iter()
                .map(|spec| Entry {
                    spec,
                    manual_set: false,
                    locked: false,
                    reset_at: now,
                    suppress_until: now,
                    last_single: None,
                })
                .collect(),
        }
    }

    #[allow(dead_code)]
    pub fn locked(&self, turnout: usize) -> bool {
        self.entries.iter().any(|e| e.spec.turnout == turnout && e.locked)
    }

    pub fn tick(&mut self, snap: &SensorSnapshot, now: Instant, ctl: &mut impl LayoutCtl) {
        for e in &mut self.entries {
            let t = e.spec.turnout;
            if snap.bit(e.spec.sensor) {
                if ctl.turnout_at(t) != Some(e.spec.active) && ctl.turnout_idle(t) {
                    info!("T{:02} transit, swinging to {:?}", t, e.spec.active);
                    ctl.move_turnout(t, e.spec.active);
                }
                e.reset_at = now + MIDWAY_RESET_DELAY;
                e.suppress_until = now + WYE_SUPPRESS;
                e.manual_set = false;
            } else if now >= e.reset_at
                && !e.manual_set
                && !e.locked
                && ctl.turnout_idle(t)
                && ctl.turnout_at(t) != Some(e.spec.inactive)
            {
                info!("T{:02} quiet, springing back to {:?}", t, e.spec.inactive);
                ctl.move_turnout(t, e.spec.inactive);
            }
        }
    }

    /// Panel button for one of the two turnouts. The scanner's generic
    /// double covers a 1 s window; the lock confirmation only honors the
    /// tighter window and otherwise falls back to a plain toggle.
    pub fn button(&mut self, turnout: usize, press: Press, now: Instant, ctl: &mut impl LayoutCtl) {
        let other_locked = self
            .entries
            .iter()
            .any(|e| e.spec.turnout != turnout && e.locked);
        let Some(e) = self.entries.iter_mut().find(|e| e.spec.turnout == turnout) else {
            return;
        };
        if !ctl.turnout_idle(turnout) || now < e.suppress_until {
            info!("T{:02} button ignored (busy or just transited)", turnout);
            return;
        }
        let lock_confirm = press == Press::Double
            && e.last_single.map_or(false, |t| now.duration_since(t) <= MIDWAY_LOCK_WINDOW);
        if lock_confirm {
            if other_locked {
                // derail guard: the two sidings must never both be pinned
                info!("T{:02} lock refused, partner turnout is pinned", turnout);
                ctl.play(layout::CLIP_ERROR);
                return;
            }
            e.locked = true;
            e.last_single = None;
            if ctl.turnout_at(turnout) != Some(e.spec.active) {
                ctl.move_turnout(turnout, e.spec.active);
            }
            info!("T{:02} pinned {:?}", turnout, e.spec.active);
            return;
        }
        // single press (or a late double, same thing here)
        if e.locked {
            e.locked = false;
            info!("T{:02} unpinned", turnout);
            ctl.play(layout::CLIP_UNLOCK);
            return;
        }
        let target = if ctl.turnout_at(turnout) == Some(e.spec.active) {
            e.spec.inactive
        } else {
            e.spec.active
        };
        ctl.move_turnout(turnout, target);
        e.manual_set = true;
        e.last_single = Some(now);
        info!("T{:02} toggled to {:?}", turnout, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TurnoutPos;
    use crate::control::fake::FakeCtl;
    use std::time::Duration;

    fn snap_sensor(bit: usize) -> SensorSnapshot {
        let mut s = SensorSnapshot::default();
        s.state2 |= 1 << (bit - 16);
        s
    }

    fn t05() -> &'static MidwaySpec { &layout::MIDWAY[0] }

    #[test]
    fn transit_swings_active_then_springs_back() {
        let mut mw = Midway::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(5, TurnoutPos::Close);
        let t0 = Instant::now();

        mw.tick(&snap_sensor(t05().sensor), t0, &mut ctl);
        assert_eq!(ctl.moves, vec![(5, TurnoutPos::Open)]);
        ctl.settle_all();

        // still inside the reset window: nothing
        ctl.moves.clear();
        mw.tick(&SensorSnapshot::default(), t0 + Duration::from_secs(10), &mut ctl);
        assert!(ctl.moves.is_empty());

        // window expired: back to inactive
        mw.tick(&SensorSnapshot::default(), t0 + Duration::from_secs(16), &mut ctl);
        assert_eq!(ctl.moves, vec![(5, TurnoutPos::Close)]);
    }

    #[test]
    fn retrigger_extends_the_window() {
        let mut mw = Midway::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(5, TurnoutPos::Close);
        let t0 = Instant::now();
        mw.tick(&snap_sensor(t05().sensor), t0, &mut ctl);
        ctl.settle_all();
        // another car trips the sensor at t+10
        mw.tick(&snap_sensor(t05().sensor), t0 + Duration::from_secs(10), &mut ctl);
        ctl.moves.clear();
        // t+16 is inside the refreshed window
        mw.tick(&SensorSnapshot::default(), t0 + Duration::from_secs(16), &mut ctl);
        assert!(ctl.moves.is_empty());
        mw.tick(&SensorSnapshot::default(), t0 + Duration::from_secs(26), &mut ctl);
        assert_eq!(ctl.moves, vec![(5, TurnoutPos::Close)]);
    }

    #[test]
    fn single_press_toggles_and_holds_until_transit() {
        let mut mw = Midway::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(5, TurnoutPos::Close);
        let t0 = Instant::now();
        mw.button(5, Press::Single, t0, &mut ctl);
        assert_eq!(ctl.moves, vec![(5, TurnoutPos::Open)]);
        ctl.settle_all();

        // manual set: the reset window alone must not spring it back
        ctl.moves.clear();
        mw.tick(&SensorSnapshot::default(), t0 + Duration::from_secs(20), &mut ctl);
        assert!(ctl.moves.is_empty());

        // a transit clears the manual flag, then the window resets it
        mw.tick(&snap_sensor(t05().sensor), t0 + Duration::from_secs(21), &mut ctl);
        ctl.settle_all();
        mw.tick(&SensorSnapshot::default(), t0 + Duration::from_secs(40), &mut ctl);
        assert_eq!(ctl.moves, vec![(5, TurnoutPos::Close)]);
    }

    #[test]
    fn quick_double_pins_until_single() {
        let mut mw = Midway::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(5, TurnoutPos::Close);
        let t0 = Instant::now();
        mw.button(5, Press::Single, t0, &mut ctl);
        ctl.settle_all();
        mw.button(5, Press::Double, t0 + Duration::from_millis(400), &mut ctl);
        assert!(mw.locked(5));

        // locked: the reset window is ignored even after a transit
        mw.tick(&snap_sensor(t05().sensor), t0 + Duration::from_secs(1), &mut ctl);
        ctl.settle_all();
        ctl.moves.clear();
        mw.tick(&SensorSnapshot::default(), t0 + Duration::from_secs(30), &mut ctl);
        assert!(ctl.moves.is_empty());

        // next single releases
        mw.button(5, Press::Single, t0 + Duration::from_secs(31), &mut ctl);
        assert!(!mw.locked(5));
        assert_eq!(ctl.clips.last().unwrap(), layout::CLIP_UNLOCK);
    }

    #[test]
    fn slow_double_is_just_a_toggle() {
        let mut mw = Midway::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(5, TurnoutPos::Close);
        let t0 = Instant::now();
        mw.button(5, Press::Single, t0, &mut ctl);
        ctl.settle_all();
        // 0.8 s gap: inside the scanner's double window but outside the
        // lock confirmation window
        mw.button(5, Press::Double, t0 + Duration::from_millis(800), &mut ctl);
        assert!(!mw.locked(5));
        assert_eq!(ctl.moves, vec![(5, TurnoutPos::Open), (5, TurnoutPos::Close)]);
    }

    #[test]
    fn derail_guard_refuses_a_second_pin() {
        let mut mw = Midway::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(5, TurnoutPos::Close);
        ctl.positions.insert(6, TurnoutPos::Close);
        let t0 = Instant::now();
        mw.button(5, Press::Single, t0, &mut ctl);
        ctl.settle_all();
        mw.button(5, Press::Double, t0 + Duration::from_millis(300), &mut ctl);
        ctl.settle_all();
        assert!(mw.locked(5));

        mw.button(6, Press::Single, t0 + Duration::from_secs(2), &mut ctl);
        ctl.settle_all();
        mw.button(6, Press::Double, t0 + Duration::from_millis(2300), &mut ctl);
        assert!(!mw.locked(6));
        assert!(ctl.clips.contains(&layout::CLIP_ERROR.to_string()));
    }

    #[test]
    fn buttons_ignored_right_after_a_transit() {
        let mut mw = Midway::new();
        let mut ctl = FakeCtl::new();
        ctl.positions.insert(5, TurnoutPos::Close);
        let t0 = Instant::now();
        mw.tick(&snap_sensor(t05().sensor), t0, &mut ctl);
        ctl.settle_all();
        ctl.moves.clear();
        mw.button(5, Press::Single, t0 + Duration::from_millis(500), &mut ctl);
        assert!(ctl.moves.is_empty());
        // after the suppression window the button works again
        mw.button(5, Press::Single, t0 + Duration::from_millis(2500), &mut ctl);
        assert_eq!(ctl.moves, vec![(5, TurnoutPos::Close)]);
    }
}
