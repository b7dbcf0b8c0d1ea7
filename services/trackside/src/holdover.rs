//! Holdover reverse-loop routing. Three sensors: S1 on the mainline side,
//! S2 at the B2 exit, S3 at the B1 exit. Inbound trains get steered into a
//! free siding (alternating when both are free); outbound transits flip
//! the loop polarity back and re-arm for the next arrival. The operator
//! can pin a route with the panel buttons, which suspends the automation
//! for as long as the lock stays fresh.

use std::time::Instant;

use log::{info, warn};

use crate::api::{
    Direction, HoldoverRoute, Siding, HOLDOVER_EXIT_SUPPRESS, HOLDOVER_S1_SUPPRESS,
    ROUTE_LOCK_TIMEOUT,
};
use crate::control::LayoutCtl;
use crate::layout::{self, holdover_route, RELAY_PR02};
use crate::sensors::SensorSnapshot;

pub struct Holdover {
    last_used: Siding,
    direction: Direction,
    wait_b3_clear: bool,
    s1_until: Instant,
    s2_until: Instant,
    s3_until: Instant,
    locked: bool,
    lock_until: Instant,
}

impl Holdover {
    pub fn new() -> Holdover {
        let now = Instant::now();
        Holdover {
            last_used: Siding::B2,
            direction: Direction::In,
            wait_b3_clear: false,
            s1_until: now,
            s2_until: now,
            s3_until: now,
            locked: false,
            lock_until: now,
        }
    }

    fn set_route(&mut self, route: HoldoverRoute, ctl: &mut impl LayoutCtl) {
        let spec = holdover_route(route);
        for &(t, pos) in spec.steps {
            ctl.move_turnout(t, pos);
        }
        ctl.set_relay(RELAY_PR02, spec.polarity);
        info!("holdover route {:?} set, polarity {}", route, spec.polarity as u8);
    }

    pub fn tick(&mut self, snap: &SensorSnapshot, now: Instant, ctl: &mut impl LayoutCtl) {
        let s1 = snap.bit(layout::SENSOR_S1);
        let s2 = snap.bit(layout::SENSOR_S2);
        let s3 = snap.bit(layout::SENSOR_S3);

        if self.locked {
            // operator owns the loop; traffic just keeps the lock alive
            if s1 || s2 || s3 {
                self.lock_until = now + ROUTE_LOCK_TIMEOUT;
            }
            if now >= self.lock_until {
                info!("holdover route lock expired");
                self.locked = false;
                ctl.set_lock_led(false);
            }
            return;
        }

        if s1 && now >= self.s1_until {
            self.s1_until = now + HOLDOVER_S1_SUPPRESS;
            match self.direction {
                Direction::In => {
                    let b1 = snap.block(1);
                    let b2 = snap.block(2);
                    if b1 && b2 {
                        warn!("holdover full with inbound traffic on S1");
                        ctl.play(layout::CLIP_WRECK);
                    } else {
                        let pick = match (b1, b2) {
                            (true, false) => Siding::B2,
                            (false, true) => Siding::B1,
                            // both free: alternate
                            _ => match self.last_used {
                                Siding::B1 => Siding::B2,
                                Siding::B2 => Siding::B1,
                            },
                        };
                        let route = match pick {
                            Siding::B1 => HoldoverRoute::B1In,
                            Siding::B2 => HoldoverRoute::B2In,
                        };
                        self.set_route(route, ctl);
                        self.last_used = pick;
                    }
                }
                Direction::Out => {
                    // the head end is leaving; hold the inbound logic off
                    // until the tail clears the approach block
                    self.wait_b3_clear = true;
                }
            }
        }

        if self.wait_b3_clear && !snap.block(3) {
            self.wait_b3_clear = false;
            self.direction = Direction::In;
            info!("holdover approach clear, accepting inbound again");
        }

        if s2 && now >= self.s2_until {
            self.s2_until = now + HOLDOVER_EXIT_SUPPRESS;
            self.set_route(HoldoverRoute::B2Out, ctl);
            self.direction = Direction::Out;
        }

        if s3 && now >= self.s3_until {
            self.s3_until = now + HOLDOVER_EXIT_SUPPRESS;
            self.set_route(HoldoverRoute::B1Out, ctl);
            self.direction = Direction::Out;
        }
    }

    /// Panel route buttons. While a lock is engaged any of the four acts
    /// as the release; otherwise the request routes and locks.
    pub fn button(&mut self, route: HoldoverRoute, now: Instant, ctl: &mut impl LayoutCtl) {
        if self.locked {
            self.locked = false;
            ctl.set_lock_led(false);
            ctl.play(layout::CLIP_UNLOCK);
            info!("holdover route lock released by operator");
            return;
        }
        self.set_route(route, ctl);
        self.direction = match route {
            HoldoverRoute::B1In | HoldoverRoute::B2In => Direction::In,
            _ => Direction::Out,
        };
        self.locked = true;
        self.lock_until = now + ROUTE_LOCK_TIMEOUT;
        ctl.set_lock_led(true);
        info!("holdover route {:?} locked", route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TurnoutPos;
    use crate::control::fake::FakeCtl;
    use std::time::Duration;

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

    #[test]
    fn inbound_alternation_prefers_the_other_siding() {
        // S1 scenario: both sidings free, last used B2, so B1 is chosen
        let mut ho = Holdover::new();
        let mut ctl = FakeCtl::new();
        let t0 = Instant::now();
        ho.tick(&snap(&[layout::SENSOR_S1]), t0, &mut ctl);
        assert_eq!(
            ctl.moves,
            vec![(1, TurnoutPos::Close), (2, TurnoutPos::Close), (3, TurnoutPos::Close)]
        );
        assert_eq!(ctl.relays, vec![(RELAY_PR02, false)]);
        assert_eq!(ho.last_used, Siding::B1);

        // S1 still hot inside the window: nothing more happens
        ctl.moves.clear();
        ho.tick(&snap(&[layout::SENSOR_S1]), t0 + Duration::from_millis(200), &mut ctl);
        ho.tick(&snap(&[layout::SENSOR_S1]), t0 + Duration::from_secs(5), &mut ctl);
        assert!(ctl.moves.is_empty());
    }

    #[test]
    fn occupied_siding_is_avoided() {
        let mut ho = Holdover::new();
        let mut ctl = FakeCtl::new();
        // B1 occupied: the inbound must go to B2 even though alternation
        // would pick B1
        ho.tick(
            &snap(&[layout::SENSOR_S1, layout::block_sensor(1)]),
            Instant::now(),
            &mut ctl,
        );
        assert_eq!(ho.last_used, Siding::B2);
        assert_eq!(ctl.relays, vec![(RELAY_PR02, true)]);
    }

    #[test]
    fn full_holdover_plays_the_wreck_warning() {
        let mut ho = Holdover::new();
        let mut ctl = FakeCtl::new();
        ho.tick(
            &snap(&[
                layout::SENSOR_S1,
                layout::block_sensor(1),
                layout::block_sensor(2),
            ]),
            Instant::now(),
            &mut ctl,
        );
        assert!(ctl.moves.is_empty());
        assert_eq!(ctl.clips, vec![layout::CLIP_WRECK.to_string()]);
    }

    #[test]
    fn exit_sets_outbound_route_and_direction() {
        let mut ho = Holdover::new();
        let mut ctl = FakeCtl::new();
        let t0 = Instant::now();
        ho.tick(&snap(&[layout::SENSOR_S3]), t0, &mut ctl);
        assert_eq!(ho.direction, Direction::Out);
        // B1 outbound keeps the same points but flips polarity
        assert_eq!(ctl.relays, vec![(RELAY_PR02, true)]);

        // S1 during the outbound move arms the B3 wait instead of routing
        ctl.moves.clear();
        ho.tick(
            &snap(&[layout::SENSOR_S1, layout::block_sensor(3)]),
            t0 + Duration::from_secs(1),
            &mut ctl,
        );
        assert!(ctl.moves.is_empty());
        assert_eq!(ho.direction, Direction::Out);
        // B3 clears: inbound logic re-arms
        ho.tick(&snap(&[]), t0 + Duration::from_secs(2), &mut ctl);
        assert_eq!(ho.direction, Direction::In);
    }

    #[test]
    fn lock_suppresses_auto_routing_and_expires() {
        let mut ho = Holdover::new();
        let mut ctl = FakeCtl::new();
        let t0 = Instant::now();
        ho.button(HoldoverRoute::B2In, t0, &mut ctl);
        assert!(ho.locked);
        assert!(ctl.lock_led);

        // sensor traffic is ignored but refreshes the lock
        ctl.moves.clear();
        ho.tick(&snap(&[layout::SENSOR_S2]), t0 + Duration::from_secs(30), &mut ctl);
        assert!(ctl.moves.is_empty());
        ho.tick(&snap(&[]), t0 + Duration::from_secs(70), &mut ctl);
        assert!(ho.locked, "refreshed lock must outlive the original window");

        ho.tick(&snap(&[]), t0 + Duration::from_secs(95), &mut ctl);
        assert!(!ho.locked);
        assert!(!ctl.lock_led);
    }

    #[test]
    fn any_button_releases_an_engaged_lock() {
        let mut ho = Holdover::new();
        let mut ctl = FakeCtl::new();
        let t0 = Instant::now();
        ho.button(HoldoverRoute::B1Out, t0, &mut ctl);
        ctl.moves.clear();
        ho.button(HoldoverRoute::B2In, t0 + Duration::from_secs(1), &mut ctl);
        assert!(!ho.locked);
        assert!(ctl.moves.is_empty(), "release must not set a new route");
        assert_eq!(ctl.clips, vec![layout::CLIP_UNLOCK.to_string()]);
    }
}
