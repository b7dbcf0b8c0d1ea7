//! Read-only status snapshot for the presentation collaborator. Every few
//! main-loop iterations the current sensor words, signal colors, turnout
//! table and crossing states land in a tmpfs directory as small text
//! files, each replaced atomically so a reader can never see a torn one.
//! The overlay pointer files name the image the web page should lay over
//! the track diagram; the choice is a pure function of layout state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;

use crate::crossing::Crossing;
use crate::layout::{self, SignalKind, MIDWAY, NUM_SIGNALS, SIGNALS, WYE_TURNOUT};
use crate::sensors::SensorSnapshot;
use crate::signals::SignalTable;
use crate::turnout::TurnoutTable;

pub struct StatusWriter {
    dir: PathBuf,
}

impl StatusWriter {
    pub fn new(dir: &Path) -> io::Result<StatusWriter> {
        fs::create_dir_all(dir)?;
        Ok(StatusWriter { dir: dir.to_path_buf() })
    }

    fn write_file(&self, name: &str, contents: &str) {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let res = fs::write(&tmp, contents).and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = res {
            warn!("status write {}: {}", name, e);
        }
    }

    pub fn publish(
        &self,
        snap: &SensorSnapshot,
        sigtable: &SignalTable,
        table: &TurnoutTable,
        crossings: &[Crossing],
        yard_last: Option<(char, char)>,
    ) {
        self.write_file("sensor.dat", &sensor_dat(snap, sigtable, table));
        self.write_file("grade.dat", &grade_dat(snap, table, crossings));

        self.write_file("h-overlay.dat", h_overlay(snap));
        let at_active = |m: &'static layout::MidwaySpec| {
            table.get(m.turnout).at_pos() == Some(m.active)
        };
        self.write_file("m-overlay.dat", m_overlay(at_active(&MIDWAY[0]), at_active(&MIDWAY[1])));
        let wye_open = table.get(WYE_TURNOUT).current >= table.get(WYE_TURNOUT).open;
        self.write_file("y-overlay.dat", y_overlay(wye_open));
        for spec in SIGNALS.iter() {
            if matches!(spec.kind, SignalKind::Spare) {
                continue;
            }
            self.write_file(
                &format!("L{:02}-overlay.dat", spec.index),
                &l_overlay(spec.index, sigtable),
            );
        }
        for gc in crossings {
            self.write_file(
                &format!("GC{:02}-overlay.dat", gc.spec.id),
                gc_overlay(gc),
            );
        }
        for track in 1..=8u8 {
            self.write_file(
                &format!("Yard-S{}-overlay.dat", track),
                &yard_overlay(track, yard_last),
            );
        }
    }
}

fn sensor_dat(snap: &SensorSnapshot, sigtable: &SignalTable, table: &TurnoutTable) -> String {
    let mut out = String::new();
    out.push_str(&format!("Sensor: {}\n", snap.word()));
    let colors: Vec<String> = (1..=NUM_SIGNALS)
        .map(|i| format!("L{:02}={}", i, sigtable.color(i).snapshot()))
        .collect();
    out.push_str(&format!("Signal: {}\n", colors.join(",")));
    for t in table.iter() {
        out.push_str(&format!(
            "T{:02}={}:{}:{}:{}:{}:{}:{}:{}\n",
            t.index, t.current, t.rate, t.open, t.middle, t.close, t.min, t.max, t.label
        ));
    }
    out
}

/// Whether a gate servo currently sits nearer its lowered endpoint;
/// tolerant of the temperature correction shifting the exact pulse.
fn gate_closed(table: &TurnoutTable, turnout: usize) -> bool {
    let t = table.get(turnout);
    let cur = t.current as i32;
    (cur - t.close as i32).abs() < (cur - t.open as i32).abs()
}

fn grade_dat(snap: &SensorSnapshot, table: &TurnoutTable, crossings: &[Crossing]) -> String {
    let mut out = String::new();
    for gc in crossings {
        let gates = gc.gate_word(|g| gate_closed(table, g));
        out.push_str(&format!(
            "GC{:02}: {}:{}:{}:{}:{}:{}\n",
            gc.spec.id,
            gc.state.snapshot(),
            if gc.lamps { "on" } else { "off" },
            gates,
            snap.bit(gc.spec.apr_west) as u8,
            snap.bit(gc.spec.road) as u8,
            snap.bit(gc.spec.apr_east) as u8,
        ));
    }
    out
}

fn h_overlay(snap: &SensorSnapshot) -> &'static str {
    match (snap.block(1), snap.block(2)) {
        (true, true) => "h-full.png",
        (true, false) => "h-b1.png",
        (false, true) => "h-b2.png",
        (false, false) => "h-empty.png",
    }
}

fn m_overlay(t05_active: bool, t06_active: bool) -> &'static str {
    match (t05_active, t06_active) {
        (true, true) => "m-both.png",
        (true, false) => "m-t05.png",
        (false, true) => "m-t06.png",
        (false, false) => "m-norm.png",
    }
}

fn y_overlay(open: bool) -> &'static str {
    if open { "y-west.png" } else { "y-east.png" }
}

fn l_overlay(signal: usize, sigtable: &SignalTable) -> String {
    let color = match sigtable.color(signal).snapshot() {
        "Grn" => "grn",
        "Yel" => "yel",
        "Red" => "red",
        _ => "off",
    };
    format!("L{:02}-{}.png\n", signal, color)
}

fn gc_overlay(gc: &Crossing) -> &'static str {
    if gc.lamps { "gc-active.png" } else { "gc-idle.png" }
}

fn yard_overlay(track: u8, yard_last: Option<(char, char)>) -> String {
    let digit = char::from_digit(track as u32, 10).unwrap();
    let aligned = yard_last.map_or(false, |(f, g)| f == digit || g == digit);
    format!("yard-s{}-{}.png\n", track, if aligned { "set" } else { "clear" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib;

    fn table() -> TurnoutTable { TurnoutTable::from_records(&calib::defaults()) }

    #[test]
    fn sensor_dat_shape() {
        let snap = SensorSnapshot { state1: 3, state2: 1 };
        let sigtable = SignalTable::new();
        let out = sensor_dat(&snap, &sigtable, &table());
        let mut lines = out.lines();
        assert_eq!(lines.next().unwrap(), format!("Sensor: {}", (1u32 << 16) | 3));
        let sig = lines.next().unwrap();
        assert!(sig.starts_with("Signal: L01=Off,L02=Off,"));
        assert!(sig.contains("L16=Off"));
        // 32 turnout lines follow
        assert_eq!(lines.count(), 32);
        assert!(out.contains("T05=450:200:750:600:450:300:900:Midway siding east"));
    }

    #[test]
    fn grade_dat_orders_west_road_east() {
        use crossbeam_channel::unbounded;
        let (tx, _rx) = unbounded();
        let crossings = vec![
            Crossing::new(&layout::CROSSINGS[0], tx.clone()),
            Crossing::new(&layout::CROSSINGS[1], tx),
        ];
        // GC02's west approach bit set, nothing else
        let mut snap = SensorSnapshot::default();
        snap.state2 |= 1 << (layout::CROSSINGS[1].apr_west - 16);
        let out = grade_dat(&snap, &table(), &crossings);
        let mut lines = out.lines();
        assert_eq!(lines.next().unwrap(), "GC01: idle:off:none:0:0:0");
        // defaults park the gates at their close endpoint
        assert_eq!(lines.next().unwrap(), "GC02: idle:off:Closed:1:0:0");
    }

    #[test]
    fn overlays_are_deterministic() {
        let mut snap = SensorSnapshot::default();
        assert_eq!(h_overlay(&snap), "h-empty.png");
        snap.state1 = 0b01;
        assert_eq!(h_overlay(&snap), "h-b1.png");
        snap.state1 = 0b11;
        assert_eq!(h_overlay(&snap), "h-full.png");

        assert_eq!(m_overlay(false, true), "m-t06.png");
        assert_eq!(y_overlay(true), "y-west.png");
        assert_eq!(yard_overlay(4, Some(('4', '5'))), "yard-s4-set.png\n");
        assert_eq!(yard_overlay(6, Some(('4', '5'))), "yard-s6-clear.png\n");
        assert_eq!(yard_overlay(6, None), "yard-s6-clear.png\n");
    }

    #[test]
    fn publish_replaces_files_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StatusWriter::new(dir.path()).unwrap();
        let snap = SensorSnapshot::default();
        let sigtable = SignalTable::new();
        use crossbeam_channel::unbounded;
        let (tx, _rx) = unbounded();
        let crossings = vec![Crossing::new(&layout::CROSSINGS[0], tx)];
        writer.publish(&snap, &sigtable, &table(), &crossings, None);
        writer.publish(&snap, &sigtable, &table(), &crossings, Some(('1', '2')));
        assert!(dir.path().join("sensor.dat").exists());
        assert!(dir.path().join("grade.dat").exists());
        assert!(dir.path().join("L01-overlay.dat").exists());
        assert!(dir.path().join("GC01-overlay.dat").exists());
        let s1 = fs::read_to_string(dir.path().join("Yard-S1-overlay.dat")).unwrap();
        assert_eq!(s1, "yard-s1-set.png\n");
        // no tmp litter left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp")
            })
            .collect();
        assert!(leftovers.is_empty());
    }
}
