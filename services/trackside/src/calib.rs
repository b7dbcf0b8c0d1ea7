//! Turnout calibration file. One record per servo channel in a fixed
//! human-readable form:
//!
//! ```text
//! Turnout:05 Pid:0 Addr:0x41 Port:4 Pos:450 Rate:200 Open:750 Middle:600 Close:450 MinPos:300 MaxPos:900 Id:Midway siding east
//! ```
//!
//! `#` lines and blank lines are ignored. `Pid` is historical and always
//! written as 0. The file is rewritten atomically (write-then-rename) at
//! shutdown; an explicit regeneration request backs the old file up with a
//! `.bak` extension first.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::Local;
use log::{info, warn};

use crate::layout::{self, TurnoutSpec, NUM_TURNOUTS};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalRecord {
    pub index: usize,
    pub addr: u8,
    pub channel: u8,
    pub pos: u16,
    pub rate: u16,
    pub open: u16,
    pub middle: u16,
    pub close: u16,
    pub min: u16,
    pub max: u16,
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CalibError {
    #[error("reading {0}: {1}")]
    Io(String, std::io::Error),
    #[error("line {0}: {1}")]
    Parse(usize, String),
    #[error("turnout {0:02}: {1}")]
    Invalid(usize, String),
    #[error("expected {NUM_TURNOUTS} records, found {0}")]
    WrongCount(usize),
}

impl CalRecord {
    pub fn from_spec(t: &TurnoutSpec) -> CalRecord {
        CalRecord {
            index: t.index,
            addr: t.addr,
            channel: t.channel,
            // factory default parks every servo at its close endpoint
            pos: t.close,
            rate: t.rate,
            open: t.open,
            middle: t.middle,
            close: t.close,
            min: t.min,
            max: t.max,
            id: t.label.to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "Turnout:{:02} Pid:0 Addr:0x{:02x} Port:{} Pos:{} Rate:{} Open:{} Middle:{} Close:{} MinPos:{} MaxPos:{} Id:{}",
            self.index,
            self.addr,
            self.channel,
            self.pos,
            self.rate,
            self.open,
            self.middle,
            self.close,
            self.min,
            self.max,
            self.id,
        )
    }
}

fn parse_line(lineno: usize, line: &str) -> Result<CalRecord, CalibError> {
    let perr = |msg: String| CalibError::Parse(lineno, msg);
    // Id: is the last field and may contain spaces; split it off first
    let (head, id) = line
        .split_once(" Id:")
        .ok_or_else(|| perr("missing Id field".into()))?;

    let mut rec = CalRecord {
        index: 0,
        addr: 0,
        channel: 0,
        pos: 0,
        rate: 0,
        open: 0,
        middle: 0,
        close: 0,
        min: 0,
        max: 0,
        id: id.to_string(),
    };
    let mut seen = 0u32;
    for tok in head.split_whitespace() {
        let (key, val) = tok
            .split_once(':')
            .ok_or_else(|| perr(format!("bad token {:?}", tok)))?;
        let num = |v: &str| -> Result<u16, CalibError> {
            v.parse::<u16>().map_err(|_| perr(format!("bad number {:?} for {}", v, key)))
        };
        match key {
            "Turnout" => rec.index = num(val)? as usize,
            "Pid" => { num(val)?; } // historical, ignored
            "Addr" => {
                let hex = val.strip_prefix("0x").ok_or_else(|| perr(format!("bad address {:?}", val)))?;
                rec.addr = u8::from_str_radix(hex, 16).map_err(|_| perr(format!("bad address {:?}", val)))?;
            }
            "Port" => rec.channel = num(val)? as u8,
            "Pos" => rec.pos = num(val)?,
            "Rate" => rec.rate = num(val)?,
            "Open" => rec.open = num(val)?,
            "Middle" => rec.middle = num(val)?,
            "Close" => rec.close = num(val)?,
            "MinPos" => rec.min = num(val)?,
            "MaxPos" => rec.max = num(val)?,
            other => return Err(perr(format!("unknown field {:?}", other))),
        }
        seen += 1;
    }
    if seen != 11 {
        return Err(perr(format!("expected 11 prefix fields, found {}", seen)));
    }
    Ok(rec)
}

pub fn load(path: &Path) -> Result<Vec<CalRecord>, CalibError> {
    let text = fs::read_to_string(path)
        .map_err(|e| CalibError::Io(path.display().to_string(), e))?;
    let mut records = Vec::with_capacity(NUM_TURNOUTS);
    for (i, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        records.push(parse_line(i + 1, line)?);
    }
    Ok(records)
}

/// Cross-check the loaded records against the fixed layout table. Identity
/// fields must agree with the binary; motion values must satisfy the
/// endpoint ordering invariants. Any violation aborts startup.
pub fn validate(records: &[CalRecord]) -> Result<(), CalibError> {
    if records.len() != NUM_TURNOUTS {
        return Err(CalibError::WrongCount(records.len()));
    }
    for (i, rec) in records.iter().enumerate() {
        let ierr = |msg: String| CalibError::Invalid(rec.index, msg);
        if rec.index != i + 1 {
            return Err(ierr(format!("out of order (slot {})", i + 1)));
        }
        let spec = layout::turnout_spec(rec.index);
        if rec.addr != spec.addr || rec.channel != spec.channel {
            return Err(ierr(format!(
                "wired at 0x{:02x}/{} but calibrated for 0x{:02x}/{}",
                spec.addr, spec.channel, rec.addr, rec.channel
            )));
        }
        if rec.min > rec.max {
            return Err(ierr(format!("MinPos {} > MaxPos {}", rec.min, rec.max)));
        }
        for (name, v) in [("Open", rec.open), ("Middle", rec.middle), ("Close", rec.close), ("Pos", rec.pos)] {
            if v < rec.min || v > rec.max {
                return Err(ierr(format!("{} {} outside {}..={}", name, v, rec.min, rec.max)));
            }
        }
        if rec.rate == 0 {
            return Err(ierr("Rate must be nonzero".into()));
        }
    }
    Ok(())
}

/// Atomic replace: the presentation collaborator and the next startup see
/// either the old file or the new one, never a torn write.
pub fn save(path: &Path, records: &[CalRecord]) -> std::io::Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "# trackside turnout calibration");
    let _ = writeln!(out, "# written {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    for rec in records {
        let _ = writeln!(out, "{}", rec.to_line());
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, out)?;
    fs::rename(&tmp, path)?;
    info!("calibration saved to {}", path.display());
    Ok(())
}

pub fn defaults() -> Vec<CalRecord> {
    layout::TURNOUTS.iter().map(CalRecord::from_spec).collect()
}

/// `--new-calibration`: back up whatever is there, then write factory
/// defaults.
pub fn regenerate(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        let bak = path.with_extension("bak");
        fs::copy(path, &bak)?;
        info!("existing calibration backed up to {}", bak.display());
    }
    save(path, &defaults())
}

/// Load with the boot tolerance policy: a missing or corrupt file warns and
/// falls back to defaults; a file that parses but contradicts the layout
/// is a hard startup error.
pub fn load_or_default(path: &Path) -> Result<Vec<CalRecord>, CalibError> {
    match load(path) {
        Ok(records) => {
            validate(&records)?;
            info!("calibration loaded from {}", path.display());
            Ok(records)
        }
        Err(CalibError::Io(_, e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("no calibration file at {}, using factory defaults", path.display());
            Ok(defaults())
        }
        Err(CalibError::Parse(line, msg)) => {
            warn!("calibration file corrupt (line {}: {}), using factory defaults", line, msg);
            Ok(defaults())
        }
        Err(e) => Err(e),
    }
}
