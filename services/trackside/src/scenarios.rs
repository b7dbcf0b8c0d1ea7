//! Cross-module scenarios: several controllers driven together over a
//! simulated timeline against the recorded fake actuator, the way the
//! main loop composes them. These catch interactions the per-module
//! suites cannot, like section logic and crossings sharing one tick.
#![cfg(test)]

use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;

use crate::api::{Color, GradeState, HoldoverRoute, Press, TurnoutPos};
use crate::aspects::desired_colors;
use crate::control::fake::FakeCtl;
use crate::control::LayoutCtl;
use crate::crossing::{Crossing, GateOps};
use crate::holdover::Holdover;
use crate::layout;
use crate::midway::Midway;
use crate::sensors::SensorSnapshot;
use crate::wye::Wye;

fn snap(bits: &[usize]) -> SensorSnapshot {
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

/// The fake implements both control surfaces, like HwCtl does.
impl GateOps for FakeCtl {
    fn command(&mut self, turnout: usize, pos: TurnoutPos) {
        LayoutCtl::move_turnout(self, turnout, pos);
    }

    fn is_idle(&mut self, turnout: usize) -> bool { LayoutCtl::turnout_idle(self, turnout) }
}

#[test]
fn holdover_full_cycle_alternates_sidings() {
    let mut ho = Holdover::new();
    let mut ctl = FakeCtl::new();
    let t0 = Instant::now();

    // first arrival goes to B1
    ho.tick(&snap(&[layout::SENSOR_S1]), t0, &mut ctl);
    assert_eq!(ctl.relays.last(), Some(&(layout::RELAY_PR02, false)));
    ctl.settle_all();

    // the train later leaves B1: S3 fires, outbound route, direction out
    let t1 = t0 + Duration::from_secs(60);
    ho.tick(&snap(&[layout::SENSOR_S3, layout::block_sensor(3)]), t1, &mut ctl);
    assert_eq!(ctl.relays.last(), Some(&(layout::RELAY_PR02, true)));
    ctl.settle_all();

    // S1 fires as the departing train crosses it with B3 still occupied:
    // no inbound routing yet
    let moves_before = ctl.moves.len();
    ho.tick(
        &snap(&[layout::SENSOR_S1, layout::block_sensor(3)]),
        t1 + Duration::from_secs(1),
        &mut ctl,
    );
    assert_eq!(ctl.moves.len(), moves_before);

    // tail clears the approach block, inbound re-arms
    ho.tick(&snap(&[]), t1 + Duration::from_secs(10), &mut ctl);

    // next arrival alternates to B2
    let t2 = t1 + Duration::from_secs(120);
    ho.tick(&snap(&[layout::SENSOR_S1]), t2, &mut ctl);
    assert_eq!(ctl.relays.last(), Some(&(layout::RELAY_PR02, true)));
    assert_eq!(ctl.moves.last(), Some(&(3, TurnoutPos::Open)));
}

#[test]
fn one_tick_runs_sections_and_crossing_without_interference() {
    // a train trips the midway sensor while another activates GC02: the
    // two command disjoint turnouts through the same control surface
    let mut mw = Midway::new();
    let (lamp_tx, _lamp_rx) = unbounded();
    let mut gc = Crossing::new(&layout::CROSSINGS[1], lamp_tx);
    let mut ctl = FakeCtl::new();
    ctl.positions.insert(5, TurnoutPos::Close);
    let t0 = Instant::now();

    let both = snap(&[layout::SENSOR_S5, gc.spec.apr_east]);
    mw.tick(&both, t0, &mut ctl);
    gc.tick(&both, t0, &mut ctl);
    assert_eq!(ctl.moves, vec![(5, TurnoutPos::Open)]);
    assert_eq!(gc.state, GradeState::GateLower);

    // half a second on, the gates drop; the midway swing is untouched
    let t1 = t0 + Duration::from_millis(600);
    mw.tick(&both, t1, &mut ctl);
    gc.tick(&both, t1, &mut ctl);
    assert_eq!(
        ctl.moves,
        vec![(5, TurnoutPos::Open), (31, TurnoutPos::Close), (32, TurnoutPos::Close)]
    );

    // quiet layout: midway springs back after its window while the
    // crossing is long idle again
    ctl.settle_all();
    let t2 = t0 + Duration::from_secs(20);
    mw.tick(&snap(&[]), t2, &mut ctl);
    assert_eq!(ctl.moves.last(), Some(&(5, TurnoutPos::Close)));
}

#[test]
fn locked_holdover_still_lets_the_wye_work() {
    let mut ho = Holdover::new();
    let mut wye = Wye::new();
    let mut ctl = FakeCtl::new();
    ctl.positions.insert(layout::WYE_TURNOUT, TurnoutPos::Open);
    let t0 = Instant::now();

    ho.button(HoldoverRoute::B2In, t0, &mut ctl);
    assert!(ctl.lock_led);
    let moves_after_lock = ctl.moves.len();

    // holdover sensors are ignored under the lock, the wye is not
    let s = snap(&[layout::SENSOR_S2, layout::SENSOR_S8]);
    let t1 = t0 + Duration::from_secs(5);
    ho.tick(&s, t1, &mut ctl);
    wye.tick(&s, t1, &mut ctl);
    assert_eq!(ctl.moves[moves_after_lock..], [(layout::WYE_TURNOUT, TurnoutPos::Close)]);
    assert_eq!(ctl.relays.last(), Some(&(layout::RELAY_PR03, false)));
}

#[test]
fn midway_lock_guard_holds_across_both_turnouts_under_traffic() {
    let mut mw = Midway::new();
    let mut ctl = FakeCtl::new();
    ctl.positions.insert(5, TurnoutPos::Close);
    ctl.positions.insert(6, TurnoutPos::Close);
    let t0 = Instant::now();

    // pin T05
    mw.button(5, Press::Single, t0, &mut ctl);
    ctl.settle_all();
    mw.button(5, Press::Double, t0 + Duration::from_millis(300), &mut ctl);
    ctl.settle_all();

    // traffic through T06 runs normally
    mw.tick(&snap(&[layout::SENSOR_S6]), t0 + Duration::from_secs(2), &mut ctl);
    assert_eq!(ctl.moves.last(), Some(&(6, TurnoutPos::Open)));
    ctl.settle_all();

    // pinning T06 on top is refused even after its transit
    mw.button(6, Press::Single, t0 + Duration::from_secs(6), &mut ctl);
    ctl.settle_all();
    mw.button(6, Press::Double, t0 + Duration::from_millis(6300), &mut ctl);
    assert!(ctl.clips.contains(&layout::CLIP_ERROR.to_string()));

    // T05 stays pinned through its quiet window
    ctl.moves.clear();
    mw.tick(&snap(&[]), t0 + Duration::from_secs(40), &mut ctl);
    assert!(!ctl.moves.contains(&(5, TurnoutPos::Close)));
}

#[test]
fn signal_demands_follow_a_train_down_the_main() {
    // B3 then B4 then B5: the red pair marches one block behind the train
    let d3 = desired_colors(&snap(&[layout::block_sensor(3)]));
    assert_eq!(d3[0], Color::Red);
    assert_eq!(d3[1], Color::Red);
    assert_eq!(d3[4], Color::Green);

    let d4 = desired_colors(&snap(&[layout::block_sensor(4)]));
    assert_eq!(d4[2], Color::Red);
    assert_eq!(d4[3], Color::Red);
    assert_eq!(d4[0], Color::Off, "the signals behind the train release");

    let d5 = desired_colors(&snap(&[layout::block_sensor(5)]));
    assert_eq!(d5[4], Color::Red);
    assert_eq!(d5[5], Color::Red);
    // the approach signal two blocks back goes yellow
    assert_eq!(d5[9], Color::Yellow);
}

#[test]
fn scripted_arrival_drives_the_holdover() {
    // a sim script stands in for the sensor chips end to end
    let script = "0 set S1\n100 set B3\n200 clear S1\n";
    let events = crate::sim::parse_script(script).unwrap();
    let mut ho = Holdover::new();
    let mut ctl = FakeCtl::new();
    let t0 = Instant::now();
    for (i, (_, s)) in events.iter().enumerate() {
        ho.tick(s, t0 + Duration::from_millis(100 * i as u64), &mut ctl);
    }
    // the arrival routed into B1 exactly once
    assert_eq!(
        ctl.moves,
        vec![(1, TurnoutPos::Close), (2, TurnoutPos::Close), (3, TurnoutPos::Close)]
    );
}
