//! Diagnostic modes. Each routine exercises one hardware region with the
//! same drivers the daemon uses, runs a bounded pattern, and returns, so a
//! fresh wiring harness can be brought up chip by chip.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::info;
use railhal::mcp23017::Mcp23017;
use railhal::SharedBus;

use crate::api::{Color, LampCmd, SignalCmd, TurnoutPos};
use crate::crossing;
use crate::keypad::{self, ScanCtl};
use crate::layout::{self, NUM_SIGNALS};
use crate::mainloop::Outputs;
use crate::sensors::Sensors;
use crate::signals::{self, ShiftPins};
use crate::sound::Player;
use crate::turnout::{Movers, TurnoutTable};

const WATCH_WINDOW: Duration = Duration::from_secs(30);

/// Walk every head through its four colors, then a whole-register yellow
/// to eyeball the weave calibration.
pub fn test_signals(pins: ShiftPins) {
    let (tx, handle) = signals::spawn(pins);
    for sig in 1..=NUM_SIGNALS {
        info!("signal L{:02}", sig);
        for color in [Color::Red, Color::Green, Color::Yellow, Color::Off] {
            signals::send_color(&tx, sig, color);
            thread::sleep(Duration::from_millis(750));
        }
    }
    info!("all heads yellow for weave check");
    for sig in 1..=NUM_SIGNALS {
        signals::send_color(&tx, sig, Color::Yellow);
    }
    thread::sleep(Duration::from_secs(5));
    let _ = tx.send(SignalCmd::Quit);
    let _ = handle.join();
}

/// Swing every turnout open and back closed at its calibrated rate.
pub fn test_turnouts(movers: &mut Movers, table: &mut TurnoutTable) {
    for index in 1..=table.iter().count() {
        info!("T{:02} {}", index, table.get(index).label);
        movers.move_to(table, index, TurnoutPos::Open);
        movers.wait_idle(table, index, Duration::from_secs(10));
        movers.move_to(table, index, TurnoutPos::Close);
        movers.wait_idle(table, index, Duration::from_secs(10));
    }
}

/// Run each crossing's lamps and bells for a few seconds, then cycle its
/// gates if it has any.
pub fn test_grade_crossing(
    signal_tx: crossbeam_channel::Sender<SignalCmd>,
    bus: SharedBus,
    panel: Mcp23017,
    movers: &mut Movers,
    table: &mut TurnoutTable,
) {
    for spec in layout::CROSSINGS.iter() {
        info!("GC{:02} lamps and bell", spec.id);
        let (lamp_tx, handle) = crossing::spawn_lamp(spec, signal_tx.clone(), bus.clone(), panel.clone());
        let _ = lamp_tx.send(LampCmd::Start(crate::api::BellKind::Approach));
        thread::sleep(Duration::from_secs(5));
        let _ = lamp_tx.send(LampCmd::Stop);
        for &gate in spec.gates {
            info!("GC{:02} gate T{:02}", spec.id, gate);
            movers.move_to(table, gate, TurnoutPos::Close);
            movers.wait_idle(table, gate, Duration::from_secs(10));
            movers.move_to(table, gate, TurnoutPos::Open);
            movers.wait_idle(table, gate, Duration::from_secs(10));
        }
        let _ = lamp_tx.send(LampCmd::Quit);
        let _ = handle.join();
    }
}

/// Echo decoded keys for half a minute.
pub fn test_keypad(bus: SharedBus) {
    let chip = keypad::init_keypad_chip(&bus);
    let (rx, ctl, handle) = keypad::spawn_keypad(bus, chip);
    info!("press keys; watching for {:?}", WATCH_WINDOW);
    let deadline = Instant::now() + WATCH_WINDOW;
    while Instant::now() < deadline {
        if let Ok(ev) = rx.recv_timeout(Duration::from_millis(250)) {
            info!("key {}", ev.0);
        }
    }
    let _ = ctl.send(ScanCtl::Quit);
    let _ = handle.join();
}

/// Log every sensor edge for half a minute.
pub fn test_sensors(sensors: &mut Sensors) {
    info!("watching sensors for {:?}", WATCH_WINDOW);
    let deadline = Instant::now() + WATCH_WINDOW;
    let mut last = sensors.read();
    info!("initial word {:08x}", last.word());
    while Instant::now() < deadline {
        let snap = sensors.read();
        if snap != last {
            for (i, spec) in layout::SENSOR_MAP.iter().enumerate() {
                if snap.bit(i) != last.bit(i) {
                    info!(
                        "bit {:02} ({}) -> {}",
                        i,
                        spec.desc,
                        snap.bit(i) as u8
                    );
                }
            }
            last = snap;
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// Click each polarity relay and indicator in turn.
pub fn test_relays(outputs: &mut Outputs) {
    for (i, relay) in outputs.relays.iter_mut().enumerate() {
        info!("PR{:02} on", i + 1);
        relay.set_high();
        thread::sleep(Duration::from_secs(1));
        relay.set_low();
        thread::sleep(Duration::from_millis(250));
    }
    for (name, pin) in [
        ("keypad first-digit LED", &mut outputs.first_digit_led),
        ("route lock LED", &mut outputs.lock_led),
    ] {
        info!("{} on", name);
        pin.set_high();
        thread::sleep(Duration::from_secs(1));
        pin.set_low();
    }
}

/// Run through every clip the daemon can play.
pub fn test_sound(player: &Player) {
    let mut clips = vec![layout::CLIP_WRECK, layout::CLIP_ERROR, layout::CLIP_UNLOCK];
    clips.extend_from_slice(&layout::TONE_SEQUENCE);
    for clip in clips {
        info!("playing {}", clip);
        player.play(clip);
        thread::sleep(Duration::from_secs(2));
    }
}

/// Interactive endpoint tuning over stdin:
///
/// ```text
/// 05 o          swing T05 to its open endpoint
/// 05 +10        nudge the current pulse up
/// 05 =620       jump to an absolute pulse
/// q             quit (positions are saved by the caller)
/// ```
pub fn servo_adjust(movers: &mut Movers, table: &mut TurnoutTable) {
    let stdin = io::stdin();
    println!("servo adjust: 'NN o|m|c', 'NN +d', 'NN -d', 'NN =pulse', 'q' to finish");
    print!("> ");
    let _ = io::stdout().flush();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.eq_ignore_ascii_case("q") {
            break;
        }
        match parse_adjust(line) {
            Some((index, cmd)) if index >= 1 && index <= table.iter().count() => {
                apply_adjust(index, cmd, movers, table);
                let t = table.get(index);
                println!(
                    "T{:02} pos {} (open {} middle {} close {})",
                    t.index, t.current, t.open, t.middle, t.close
                );
            }
            _ => println!("?"),
        }
        print!("> ");
        let _ = io::stdout().flush();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Adjust {
    Endpoint(TurnoutPos),
    Nudge(i32),
    Absolute(u16),
}

fn parse_adjust(line: &str) -> Option<(usize, Adjust)> {
    let (idx, rest) = line.split_once(char::is_whitespace)?;
    let index = idx.parse::<usize>().ok()?;
    let rest = rest.trim();
    let cmd = match rest {
        "o" => Adjust::Endpoint(TurnoutPos::Open),
        "m" => Adjust::Endpoint(TurnoutPos::Middle),
        "c" => Adjust::Endpoint(TurnoutPos::Close),
        _ => {
            if let Some(v) = rest.strip_prefix('=') {
                Adjust::Absolute(v.parse().ok()?)
            } else if let Some(v) = rest.strip_prefix('+') {
                Adjust::Nudge(v.parse::<i32>().ok()?)
            } else if let Some(v) = rest.strip_prefix('-') {
                Adjust::Nudge(-v.parse::<i32>().ok()?)
            } else {
                return None;
            }
        }
    };
    Some((index, cmd))
}

fn apply_adjust(index: usize, cmd: Adjust, movers: &mut Movers, table: &mut TurnoutTable) {
    match cmd {
        Adjust::Endpoint(pos) => {
            movers.move_to(table, index, pos);
            movers.wait_idle(table, index, Duration::from_secs(10));
        }
        Adjust::Nudge(delta) => {
            let t = table.get(index);
            let target = (t.current as i32 + delta).clamp(t.min as i32, t.max as i32) as u16;
            movers.nudge(table, index, target);
        }
        Adjust::Absolute(pulse) => {
            let t = table.get(index);
            let target = pulse.clamp(t.min, t.max);
            movers.nudge(table, index, target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_grammar() {
        assert_eq!(parse_adjust("05 o"), Some((5, Adjust::Endpoint(TurnoutPos::Open))));
        assert_eq!(parse_adjust("12 +10"), Some((12, Adjust::Nudge(10))));
        assert_eq!(parse_adjust("12 -3"), Some((12, Adjust::Nudge(-3))));
        assert_eq!(parse_adjust("31 =620"), Some((31, Adjust::Absolute(620))));
        assert_eq!(parse_adjust("x o"), None);
        assert_eq!(parse_adjust("05"), None);
        assert_eq!(parse_adjust("05 ?"), None);
    }
}
