//! trackside: layout automation daemon. Turnout servos, block signals,
//! grade crossings, track-power polarity and the operator panel for a
//! single HO layout, headless on an SBC.

mod api;
mod aspects;
mod calib;
mod control;
mod crossing;
mod diag;
mod holdover;
mod keypad;
mod layout;
mod mainloop;
mod midway;
mod mirror;
mod scenarios;
mod sensors;
mod shutdown;
mod signals;
mod sim;
mod sound;
mod status;
mod turnout;
mod wye;
mod yard;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use railhal::w1temp::W1Temp;
use railhal::I2cBus;
use rppal::gpio::Gpio;

use crate::mainloop::Daemon;
use crate::sensors::{SensorSource, Sensors};
use crate::shutdown::{Arming, Workers};
use crate::signals::ShiftPins;
use crate::sound::Player;
use crate::status::StatusWriter;
use crate::turnout::{Movers, TurnoutTable};

#[derive(Parser, Debug)]
#[command(name = "trackside", about = "HO layout automation daemon", version)]
struct Opts {
    /// Suppress console logging entirely
    #[arg(short, long)]
    quiet: bool,

    /// Debug level: 0 warnings, 1 info, 2 debug, 3 trace
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    debug: u8,

    /// Turnout calibration file
    #[arg(long, value_name = "FILE", default_value = layout::CALIB_FILE_DEFAULT)]
    calibration_file: PathBuf,

    /// Directory the status snapshot files are published into
    #[arg(long, value_name = "DIR", default_value = layout::STATUS_DIR_DEFAULT)]
    status_dir: PathBuf,

    /// Back up the calibration file and rewrite factory defaults, then exit
    #[arg(long)]
    new_calibration: bool,

    /// Cycle every signal head through its colors and exit
    #[arg(long)]
    test_signals: bool,

    /// Swing every turnout open and closed and exit
    #[arg(long)]
    test_turnouts: bool,

    /// Exercise crossing lamps, bells and gates and exit
    #[arg(long)]
    test_grade_crossing: bool,

    /// Echo yard keypad presses for 30 s and exit
    #[arg(long)]
    test_keypad: bool,

    /// Log sensor edges for 30 s and exit
    #[arg(long)]
    test_sensors: bool,

    /// Click the polarity relays and panel LEDs and exit
    #[arg(long)]
    test_relays: bool,

    /// Play every sound clip and exit
    #[arg(long)]
    test_sound: bool,

    /// Interactive servo endpoint tuning over stdin
    #[arg(long)]
    servo_adjust: bool,

    /// Drive the main loop from a timed sensor script instead of the
    /// live expanders
    #[arg(long, value_name = "SCRIPT")]
    simulate: Option<PathBuf>,
}

fn init_logger(opts: &Opts) {
    let level = if opts.quiet {
        LevelFilter::Off
    } else {
        match opts.debug {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new().filter_level(level).format_timestamp_millis().init();
}

fn claim_shift_pins(gpio: &Gpio) -> Result<ShiftPins> {
    Ok(ShiftPins {
        data: railhal::gpio::output(gpio, layout::PIN_SR_DATA)?,
        clock: railhal::gpio::output(gpio, layout::PIN_SR_CLOCK)?,
        latch: railhal::gpio::output(gpio, layout::PIN_SR_LATCH)?,
        enable: railhal::gpio::output(gpio, layout::PIN_SR_ENABLE)?,
    })
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logger(&opts);

    if opts.new_calibration {
        calib::regenerate(&opts.calibration_file)
            .with_context(|| format!("regenerating {}", opts.calibration_file.display()))?;
        return Ok(());
    }

    let records = calib::load_or_default(&opts.calibration_file)
        .context("calibration file failed validation")?;
    let mut table = TurnoutTable::from_records(&records);
    if !turnout::check_invariants(&table) {
        bail!("turnout table failed startup invariants");
    }

    let bus = I2cBus::new().context("opening the I2C bus")?.into_shared();
    let gpio = Gpio::new().context("claiming the GPIO controller")?;
    let player = Player::new(!opts.quiet);

    let mut movers = Movers::new(bus.clone());
    movers.energize(&table);

    // diagnostic modes run against the bare drivers and exit
    if opts.test_signals {
        diag::test_signals(claim_shift_pins(&gpio)?);
        return Ok(());
    }
    if opts.test_turnouts {
        diag::test_turnouts(&mut movers, &mut table);
        return Ok(());
    }
    if opts.test_keypad {
        diag::test_keypad(bus.clone());
        return Ok(());
    }
    if opts.test_sensors {
        let mut sensors = Sensors::new(bus.clone());
        diag::test_sensors(&mut sensors);
        return Ok(());
    }
    if opts.test_relays {
        let mut outputs = mainloop::claim_outputs(&gpio)?;
        diag::test_relays(&mut outputs);
        return Ok(());
    }
    if opts.test_sound {
        diag::test_sound(&player);
        return Ok(());
    }
    if opts.test_grade_crossing {
        let pins = claim_shift_pins(&gpio)?;
        let (signal_tx, signal_handle) = signals::spawn(pins);
        let panel = keypad::init_panel_chip(&bus);
        diag::test_grade_crossing(signal_tx.clone(), bus.clone(), panel, &mut movers, &mut table);
        let _ = signal_tx.send(api::SignalCmd::Quit);
        let _ = signal_handle.join();
        return Ok(());
    }
    if opts.servo_adjust {
        diag::servo_adjust(&mut movers, &mut table);
        calib::save(&opts.calibration_file, &table.records())
            .with_context(|| format!("saving {}", opts.calibration_file.display()))?;
        return Ok(());
    }

    // the real daemon: spawn the worker family, then hand the main loop
    // everything it owns
    let source = match &opts.simulate {
        Some(script) => {
            SensorSource::Script(sim::ScriptPlayer::load(script).context("loading simulation script")?)
        }
        None => SensorSource::Live(Sensors::new(bus.clone())),
    };

    let outputs = mainloop::claim_outputs(&gpio)?;
    let status = StatusWriter::new(&opts.status_dir)
        .with_context(|| format!("creating {}", opts.status_dir.display()))?;

    let (signal_tx, signal_handle) = signals::spawn(claim_shift_pins(&gpio)?);

    let panel = keypad::init_panel_chip(&bus);
    let mut lamp_txs = Vec::new();
    let mut lamp_handles = Vec::new();
    let mut crossings = Vec::new();
    for spec in layout::CROSSINGS.iter() {
        let (tx, handle) = crossing::spawn_lamp(spec, signal_tx.clone(), bus.clone(), panel.clone());
        crossings.push(crossing::Crossing::new(spec, tx.clone()));
        lamp_txs.push(tx);
        lamp_handles.push(handle);
    }

    let keypad_chip = keypad::init_keypad_chip(&bus);
    let (key_rx, keypad_ctl, keypad_handle) = keypad::spawn_keypad(bus.clone(), keypad_chip);
    let (btn_rx, buttons_ctl, buttons_handle) = keypad::spawn_buttons(bus.clone(), panel.clone());
    let (mirror_tx, mirror_handle) = mirror::spawn(bus.clone(), panel.clone());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("installing the interrupt handler")?;
    }

    info!(
        "trackside up: {} turnouts, {} signals, {} crossings",
        layout::NUM_TURNOUTS,
        layout::NUM_SIGNALS,
        layout::CROSSINGS.len()
    );

    let daemon = Daemon {
        bus,
        movers,
        table,
        sigtable: signals::SignalTable::new(),
        semaphores: aspects::Semaphores::new(),
        source,
        crossings,
        holdover: holdover::Holdover::new(),
        midway: midway::Midway::new(),
        wye: wye::Wye::new(),
        yard: yard::Yard::new(),
        outputs,
        panel,
        player,
        status,
        temp: W1Temp::new(layout::W1_SENSOR_PATH),
        arming: Arming::new(),
        workers: Workers {
            signal_tx,
            signal_handle,
            lamp_txs,
            lamp_handles,
            keypad_ctl,
            keypad_handle,
            buttons_ctl,
            buttons_handle,
            mirror_tx,
            mirror_handle,
        },
        key_rx,
        btn_rx,
        stop,
        calib_path: opts.calibration_file.clone(),
    };
    daemon.run();

    // the service manager decides whether a completed countdown also
    // powers the box off
    info!("trackside exiting");
    Ok(())
}
