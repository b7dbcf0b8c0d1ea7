//! Scripted sensor playback for bench runs without a layout attached.
//! The script is a text file of timed events, one per line. An event is
//! either a whole-word load (hex, matching what the status snapshot
//! publishes) or a single named sensor edge:
//!
//! ```text
//! # millis  event
//! 0         word 0000 0001
//! 500       set S1
//! 2000      clear S1
//! 2000      word 0000 0000
//! ```
//!
//! Named edges build on the previous line's state, so a scenario reads
//! like the train movement it describes.

use std::fs;
use std::path::Path;
use std::time::Instant;

use log::info;

use crate::layout::sensor_index_by_name;
use crate::sensors::SensorSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("reading {0}: {1}")]
    Io(String, std::io::Error),
    #[error("line {0}: {1}")]
    Parse(usize, String),
}

pub struct ScriptPlayer {
    events: Vec<(u64, SensorSnapshot)>,
    started: Instant,
    next: usize,
    current: SensorSnapshot,
}

fn apply_bit(snap: &mut SensorSnapshot, index: usize, level: bool) {
    if index < 16 {
        let mask = 1u16 << index;
        if level { snap.state1 |= mask } else { snap.state1 &= !mask }
    } else {
        let mask = 1u16 << (index - 16);
        if level { snap.state2 |= mask } else { snap.state2 &= !mask }
    }
}

pub(crate) fn parse_script(text: &str) -> Result<Vec<(u64, SensorSnapshot)>, SimError> {
    let mut events: Vec<(u64, SensorSnapshot)> = Vec::new();
    let mut last_ms = 0u64;
    let mut state = SensorSnapshot::default();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let perr = |msg: String| SimError::Parse(i + 1, msg);
        let mut fields = line.split_whitespace();
        let ms = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(|| perr("bad timestamp".into()))?;
        if ms < last_ms {
            return Err(perr(format!("timestamp {} goes backwards", ms)));
        }
        last_ms = ms;

        let verb = fields.next().ok_or_else(|| perr("missing event".into()))?;
        match verb {
            "word" => {
                let state1 = fields
                    .next()
                    .and_then(|f| u16::from_str_radix(f, 16).ok())
                    .ok_or_else(|| perr("bad chip-1 word".into()))?;
                let state2 = fields
                    .next()
                    .and_then(|f| u16::from_str_radix(f, 16).ok())
                    .ok_or_else(|| perr("bad chip-2 word".into()))?;
                state = SensorSnapshot { state1, state2 };
            }
            "set" | "clear" => {
                let name = fields.next().ok_or_else(|| perr("missing sensor name".into()))?;
                let index = sensor_index_by_name(name)
                    .ok_or_else(|| perr(format!("unknown sensor {:?}", name)))?;
                apply_bit(&mut state, index, verb == "set");
            }
            other => return Err(perr(format!("unknown event {:?}", other))),
        }
        if fields.next().is_some() {
            return Err(perr("trailing fields".into()));
        }
        events.push((ms, state));
    }
    Ok(events)
}

impl ScriptPlayer {
    pub fn load(path: &Path) -> Result<ScriptPlayer, SimError> {
        let text =
            fs::read_to_string(path).map_err(|e| SimError::Io(path.display().to_string(), e))?;
        let events = parse_script(&text)?;
        info!("simulation script {} loaded, {} events", path.display(), events.len());
        Ok(ScriptPlayer {
            events,
            started: Instant::now(),
            next: 0,
            current: SensorSnapshot::default(),
        })
    }

    pub fn read(&mut self) -> SensorSnapshot {
        let elapsed = self.started.elapsed().as_millis() as u64;
        while self.next < self.events.len() && self.events[self.next].0 <= elapsed {
            self.current = self.events[self.next].1;
            self.next += 1;
        }
        self.current
    }

    pub fn finished(&self) -> bool { self.next >= self.events.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout;

    #[test]
    fn parses_timed_words() {
        let events = parse_script("# comment\n0 word 0001 0000\n\n2000 word 0000 8000\n").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1.state1, 0x0001);
        assert_eq!(events[1].0, 2000);
        assert_eq!(events[1].1.state2, 0x8000);
    }

    #[test]
    fn named_edges_accumulate() {
        let script = "0 set S1\n100 set B1\n200 clear S1\n";
        let events = parse_script(script).unwrap();
        assert!(events[0].1.bit(layout::SENSOR_S1));
        assert!(events[1].1.bit(layout::SENSOR_S1));
        assert!(events[1].1.block(1));
        assert!(!events[2].1.bit(layout::SENSOR_S1));
        assert!(events[2].1.block(1), "clearing S1 must not clear B1");
    }

    #[test]
    fn word_load_resets_named_edits() {
        let script = "0 set GC2R\n500 word 0000 0000\n";
        let events = parse_script(script).unwrap();
        assert!(events[0].1.bit(layout::CROSSINGS[1].road));
        assert_eq!(events[1].1, SensorSnapshot::default());
    }

    #[test]
    fn rejects_backwards_time() {
        assert!(matches!(
            parse_script("1000 word 0 0\n500 word 0 0\n"),
            Err(SimError::Parse(2, _))
        ));
    }

    #[test]
    fn rejects_junk() {
        assert!(parse_script("0 word zz 00\n").is_err());
        assert!(parse_script("abc word 00 00\n").is_err());
        assert!(parse_script("0 set T05\n").is_err());
        assert!(parse_script("0 toggle S1\n").is_err());
        assert!(parse_script("0 word 00 00 00\n").is_err());
    }
}
