//! The fixed hardware map of the layout. Board addresses, pin numbers,
//! sensor positions, signal wiring, aspect rules and route tables are part
//! of the binary; the calibration file only tunes servo motion values on
//! top of what is declared here.

use crate::api::{HoldoverRoute, Siding, TurnoutKind, TurnoutPos};

/////////////////////// BUS ADDRESSES

/// PWM servo boards, 16 channels each. Turnouts 1-16 live on the first
/// board, 17-32 on the second.
pub const SERVO_BOARDS: [u8; 2] = [0x41, 0x42];

pub const CHIP1_ADDR: u8 = 0x20; // block occupancy sensors
pub const CHIP2_ADDR: u8 = 0x21; // track sensors
pub const CHIP3_ADDR: u8 = 0x22; // yard keypad matrix
pub const CHIP4_ADDR: u8 = 0x23; // panel buttons, panel LEDs, bell enables

/////////////////////// GPIO (BCM numbering)

pub const PIN_SR_DATA: u8 = 17;
pub const PIN_SR_CLOCK: u8 = 27;
pub const PIN_SR_LATCH: u8 = 22;
pub const PIN_SR_ENABLE: u8 = 23;

/// Track-power polarity relays. PR02 is the holdover loop, PR03 the wye;
/// PR01 is the mainline feeder and is only driven at startup and shutdown.
pub const PIN_RELAYS: [u8; 3] = [5, 6, 13];
pub const RELAY_PR01: usize = 0;
pub const RELAY_PR02: usize = 1;
pub const RELAY_PR03: usize = 2;

pub const PIN_KEYPAD_FIRST_LED: u8 = 19;
pub const PIN_ROUTE_LOCK_LED: u8 = 26;
pub const PIN_TIMING_TEST: u8 = 16;
pub const PIN_SHUTDOWN_BTN: u8 = 21;

pub const W1_SENSOR_PATH: &str = "/sys/bus/w1/devices/28-00000a5c2e91/w1_slave";
pub const SOUND_DIR: &str = "/usr/share/trackside/sounds";
pub const STATUS_DIR_DEFAULT: &str = "/dev/shm/trackside";
pub const CALIB_FILE_DEFAULT: &str = "/etc/trackside/turnout.cal";

/////////////////////// TURNOUTS

pub const NUM_TURNOUTS: usize = 32;

#[derive(Clone, Copy, Debug)]
pub struct TurnoutSpec {
    pub index: usize, // 1-based, stable
    pub label: &'static str,
    pub addr: u8,
    pub channel: u8,
    pub kind: TurnoutKind,
    pub rate: u16,
    pub open: u16,
    pub middle: u16,
    pub close: u16,
    pub min: u16,
    pub max: u16,
}

const fn point(index: usize, label: &'static str, addr: u8, channel: u8) -> TurnoutSpec {
    TurnoutSpec {
        index,
        label,
        addr,
        channel,
        kind: TurnoutKind::Point,
        rate: 200,
        open: 750,
        middle: 600,
        close: 450,
        min: 300,
        max: 900,
    }
}

/// Factory defaults, written by `--new-calibration` and used to validate a
/// loaded file. Field tuning comes from the calibration file; identity
/// (address, channel, kind) is fixed here.
pub static TURNOUTS: [TurnoutSpec; NUM_TURNOUTS] = [
    point(1, "Holdover B1/B2 throat", 0x41, 0),
    point(2, "Holdover loop east", 0x41, 1),
    point(3, "Holdover loop west", 0x41, 2),
    point(4, "Mainline crossover", 0x41, 3),
    point(5, "Midway siding east", 0x41, 4),
    point(6, "Midway siding west", 0x41, 5),
    point(7, "Wye tail", 0x41, 6),
    point(8, "Yard lead", 0x41, 7),
    point(9, "Yard ladder 1", 0x41, 8),
    point(10, "Yard ladder 2", 0x41, 9),
    point(11, "Yard ladder 3", 0x41, 10),
    point(12, "Yard ladder 4", 0x41, 11),
    point(13, "Yard ladder 5", 0x41, 12),
    point(14, "Yard ladder 6", 0x41, 13),
    point(15, "Yard ladder 7", 0x41, 14),
    point(16, "Yard track 1/2 crossover", 0x41, 15),
    point(17, "Yard track 2/3 crossover", 0x42, 0),
    point(18, "Yard track 3/4 crossover", 0x42, 1),
    point(19, "Yard track 4/5 crossover", 0x42, 2),
    point(20, "Yard track 7/8 crossover", 0x42, 3),
    point(21, "Yard west runaround", 0x42, 4),
    point(22, "Yard east runaround", 0x42, 5),
    point(23, "Yard track 5 exit", 0x42, 6),
    point(24, "Yard track 6 exit", 0x42, 7),
    point(25, "Yard track 7 exit", 0x42, 8),
    point(26, "Yard track 8 exit", 0x42, 9),
    point(27, "Engine house lead", 0x42, 10),
    point(28, "Caboose track", 0x42, 11),
    TurnoutSpec {
        index: 29,
        label: "Semaphore L11",
        addr: 0x42,
        channel: 12,
        kind: TurnoutKind::Semaphore,
        rate: 120,
        open: 700,
        middle: 600,
        close: 500,
        min: 450,
        max: 750,
    },
    TurnoutSpec {
        index: 30,
        label: "Semaphore L12",
        addr: 0x42,
        channel: 13,
        kind: TurnoutKind::Semaphore,
        rate: 120,
        open: 700,
        middle: 600,
        close: 500,
        min: 450,
        max: 750,
    },
    TurnoutSpec {
        index: 31,
        label: "GC02 gate east",
        addr: 0x42,
        channel: 14,
        kind: TurnoutKind::Gate,
        rate: 100,
        open: 780,
        middle: 600,
        close: 420,
        min: 380,
        max: 820,
    },
    TurnoutSpec {
        index: 32,
        label: "GC02 gate west",
        addr: 0x42,
        channel: 15,
        kind: TurnoutKind::Gate,
        rate: 100,
        open: 780,
        middle: 600,
        close: 420,
        min: 380,
        max: 820,
    },
];

pub fn turnout_spec(index: usize) -> &'static TurnoutSpec { &TURNOUTS[index - 1] }

/////////////////////// SIGNALS

pub const NUM_SIGNALS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Wayside,
    /// Flag-board signal actuated by the given turnout's servo.
    Semaphore(usize),
    /// Grade crossing flasher pair.
    Crossing,
    Spare,
}

#[derive(Clone, Copy, Debug)]
pub struct SignalSpec {
    pub index: usize, // 1-based: L01..L16
    pub bits: (u8, u8),
    pub kind: SignalKind,
}

const fn sig(index: usize, kind: SignalKind) -> SignalSpec {
    // every signal owns the regular consecutive pair; L11 is 20,21 like the
    // rest of the series
    let b = (index as u8 - 1) * 2;
    SignalSpec { index, bits: (b, b + 1), kind }
}

pub static SIGNALS: [SignalSpec; NUM_SIGNALS] = [
    sig(1, SignalKind::Wayside),
    sig(2, SignalKind::Wayside),
    sig(3, SignalKind::Wayside),
    sig(4, SignalKind::Wayside),
    sig(5, SignalKind::Wayside),
    sig(6, SignalKind::Wayside),
    sig(7, SignalKind::Wayside),
    sig(8, SignalKind::Wayside),
    sig(9, SignalKind::Wayside),
    sig(10, SignalKind::Wayside),
    sig(11, SignalKind::Semaphore(29)),
    sig(12, SignalKind::Semaphore(30)),
    sig(13, SignalKind::Crossing),
    sig(14, SignalKind::Crossing),
    sig(15, SignalKind::Spare),
    sig(16, SignalKind::Spare),
];

pub fn signal_spec(index: usize) -> &'static SignalSpec { &SIGNALS[index - 1] }

/////////////////////// SENSOR MAP

#[derive(Clone, Copy, Debug)]
pub struct SensorSpec {
    pub chip: u8, // 1 or 2
    pub port: u8, // 0 = A, 1 = B
    pub bit: u8,
    pub desc: &'static str,
}

const fn sens(chip: u8, port: u8, bit: u8, desc: &'static str) -> SensorSpec {
    SensorSpec { chip, port, bit, desc }
}

/// Bit indices 0-15 are chip 1 (port A = 0-7, port B = 8-15), 16-31 chip 2.
pub static SENSOR_MAP: [SensorSpec; 32] = [
    sens(1, 0, 0, "Block B1 (holdover siding 1)"),
    sens(1, 0, 1, "Block B2 (holdover siding 2)"),
    sens(1, 0, 2, "Block B3 (holdover approach)"),
    sens(1, 0, 3, "Block B4 (east main)"),
    sens(1, 0, 4, "Block B5 (midway east)"),
    sens(1, 0, 5, "Block B6 (midway west)"),
    sens(1, 0, 6, "Block B7 (wye approach)"),
    sens(1, 0, 7, "Block B8 (west main)"),
    sens(1, 1, 0, "Block B9 (yard lead)"),
    sens(1, 1, 1, "Block B10 (yard throat)"),
    sens(1, 1, 2, "spare"),
    sens(1, 1, 3, "spare"),
    sens(1, 1, 4, "spare"),
    sens(1, 1, 5, "spare"),
    sens(1, 1, 6, "spare"),
    sens(1, 1, 7, "spare"),
    sens(2, 0, 0, "S1 holdover mainline"),
    sens(2, 0, 1, "S2 holdover B2 exit"),
    sens(2, 0, 2, "S3 holdover B1 exit"),
    sens(2, 0, 3, "S4 mainline mid"),
    sens(2, 0, 4, "S5 midway T05 transit"),
    sens(2, 0, 5, "S6 midway T06 transit"),
    sens(2, 0, 6, "S7 wye B6 approach"),
    sens(2, 0, 7, "S8 wye east leg"),
    sens(2, 1, 0, "S9 wye west leg"),
    sens(2, 1, 1, "GC01 east approach"),
    sens(2, 1, 2, "GC01 road"),
    sens(2, 1, 3, "GC01 west approach"),
    sens(2, 1, 4, "GC02 east approach"),
    sens(2, 1, 5, "GC02 road"),
    sens(2, 1, 6, "GC02 west approach"),
    sens(2, 1, 7, "spare"),
];

// named sensor bit indices into SENSOR_MAP / the 32-bit snapshot
pub const SENSOR_B1: usize = 0;
pub const SENSOR_B2: usize = 1;
pub const SENSOR_B3: usize = 2;
pub const SENSOR_S1: usize = 16;
pub const SENSOR_S2: usize = 17;
pub const SENSOR_S3: usize = 18;
pub const SENSOR_S5: usize = 20;
pub const SENSOR_S6: usize = 21;
pub const SENSOR_S7: usize = 22;
pub const SENSOR_S8: usize = 23;
pub const SENSOR_S9: usize = 24;

pub const fn block_sensor(block: usize) -> usize { block - 1 }

/// Short sensor names used by simulation scripts and the diagnostics:
/// `B1`..`B10` for the blocks, `S1`..`S9` for the track sensors, and
/// `GC<n>E`/`GC<n>R`/`GC<n>W` for the crossing approaches and roads.
pub fn sensor_index_by_name(name: &str) -> Option<usize> {
    if let Some(n) = name.strip_prefix('B').and_then(|s| s.parse::<usize>().ok()) {
        return (1..=10).contains(&n).then(|| block_sensor(n));
    }
    if let Some(n) = name.strip_prefix('S').and_then(|s| s.parse::<usize>().ok()) {
        return match n {
            1 => Some(SENSOR_S1),
            2 => Some(SENSOR_S2),
            3 => Some(SENSOR_S3),
            4 => Some(19),
            5 => Some(SENSOR_S5),
            6 => Some(SENSOR_S6),
            7 => Some(SENSOR_S7),
            8 => Some(SENSOR_S8),
            9 => Some(SENSOR_S9),
            _ => None,
        };
    }
    if let Some(rest) = name.strip_prefix("GC") {
        let (num, side) = rest.split_at(rest.len().checked_sub(1)?);
        let gc = num.parse::<usize>().ok()?;
        let spec = CROSSINGS.iter().find(|c| c.id == gc)?;
        return match side {
            "E" => Some(spec.apr_east),
            "R" => Some(spec.road),
            "W" => Some(spec.apr_west),
            _ => None,
        };
    }
    None
}

/////////////////////// SIGNAL ASPECT RULES

/// For an occupied block, which signals show green / yellow / red. Values
/// are 1-based signal indices. The coloring pass applies green first, then
/// yellow, then red, so red always wins a conflict.
pub struct AspectRule {
    pub green: &'static [usize],
    pub yellow: &'static [usize],
    pub red: &'static [usize],
}

pub static ASPECT_RULES: [AspectRule; 10] = [
    AspectRule { green: &[1], yellow: &[2], red: &[] },          // B1
    AspectRule { green: &[3], yellow: &[4], red: &[] },          // B2
    AspectRule { green: &[5], yellow: &[6], red: &[1, 2] },      // B3
    AspectRule { green: &[7], yellow: &[2, 8], red: &[3, 4] },   // B4
    AspectRule { green: &[9], yellow: &[4, 10], red: &[5, 6] },  // B5
    AspectRule { green: &[11], yellow: &[6, 12], red: &[7, 8] }, // B6
    AspectRule { green: &[], yellow: &[8], red: &[9, 10] },      // B7
    AspectRule { green: &[], yellow: &[10], red: &[11, 12] },    // B8
    AspectRule { green: &[], yellow: &[12], red: &[] },          // B9
    AspectRule { green: &[], yellow: &[], red: &[] },            // B10
];

/////////////////////// HOLDOVER

pub const HOLDOVER_TURNOUTS: [usize; 3] = [1, 2, 3];

pub struct HoldoverRouteSpec {
    pub route: HoldoverRoute,
    pub siding: Siding,
    pub steps: &'static [(usize, TurnoutPos)],
    /// Level written to PR02 while the route is in effect.
    pub polarity: bool,
}

pub static HOLDOVER_ROUTES: [HoldoverRouteSpec; 4] = [
    HoldoverRouteSpec {
        route: HoldoverRoute::B1In,
        siding: Siding::B1,
        steps: &[(1, TurnoutPos::Close), (2, TurnoutPos::Close), (3, TurnoutPos::Close)],
        polarity: false,
    },
    HoldoverRouteSpec {
        route: HoldoverRoute::B2In,
        siding: Siding::B2,
        steps: &[(1, TurnoutPos::Open), (2, TurnoutPos::Open), (3, TurnoutPos::Open)],
        polarity: true,
    },
    HoldoverRouteSpec {
        route: HoldoverRoute::B1Out,
        siding: Siding::B1,
        steps: &[(1, TurnoutPos::Close), (2, TurnoutPos::Close), (3, TurnoutPos::Close)],
        polarity: true,
    },
    HoldoverRouteSpec {
        route: HoldoverRoute::B2Out,
        siding: Siding::B2,
        steps: &[(1, TurnoutPos::Open), (2, TurnoutPos::Open), (3, TurnoutPos::Open)],
        polarity: false,
    },
];

pub fn holdover_route(route: HoldoverRoute) -> &'static HoldoverRouteSpec {
    HOLDOVER_ROUTES.iter().find(|r| r.route == route).unwrap()
}

/////////////////////// MIDWAY

pub struct MidwaySpec {
    pub turnout: usize,
    pub sensor: usize,
    pub active: TurnoutPos,
    pub inactive: TurnoutPos,
}

pub static MIDWAY: [MidwaySpec; 2] = [
    MidwaySpec { turnout: 5, sensor: SENSOR_S5, active: TurnoutPos::Open, inactive: TurnoutPos::Close },
    MidwaySpec { turnout: 6, sensor: SENSOR_S6, active: TurnoutPos::Open, inactive: TurnoutPos::Close },
];

/////////////////////// WYE

pub const WYE_TURNOUT: usize = 7;

/////////////////////// GRADE CROSSINGS

/// Where a crossing's bell-enable bits live: chip-4 port B, one bit per
/// bell kind, always written read-modify-write.
pub struct BellBits {
    pub approach: u8,
    pub road: u8,
}

pub struct CrossingSpec {
    pub id: usize,
    pub apr_east: usize,
    pub road: usize,
    pub apr_west: usize,
    pub lamp_signal: usize,
    pub gates: &'static [usize],
    pub bells: BellBits,
}

pub static CROSSINGS: [CrossingSpec; 2] = [
    CrossingSpec {
        id: 1,
        apr_east: 25,
        road: 26,
        apr_west: 27,
        lamp_signal: 13,
        gates: &[],
        bells: BellBits { approach: 2, road: 3 },
    },
    CrossingSpec {
        id: 2,
        apr_east: 28,
        road: 29,
        apr_west: 30,
        lamp_signal: 14,
        gates: &[31, 32],
        bells: BellBits { approach: 4, road: 5 },
    },
];

/// Road-bell call sites stay wired but ring nothing until this is flipped.
pub const BELL_ROAD_ENABLED: bool = false;

/////////////////////// CHIP-4 PANEL

// port A inputs
pub const BTN_BIT_HOLDOVER_B1_IN: u8 = 0;
pub const BTN_BIT_HOLDOVER_B2_IN: u8 = 1;
pub const BTN_BIT_HOLDOVER_B1_OUT: u8 = 2;
pub const BTN_BIT_HOLDOVER_B2_OUT: u8 = 3;
pub const BTN_BIT_MIDWAY_T05: u8 = 4;
pub const BTN_BIT_MIDWAY_T06: u8 = 5;
pub const BTN_BIT_WYE_CLOSE: u8 = 6;
pub const BTN_BIT_WYE_OPEN: u8 = 7;

// port B output latch partition: the mirror task owns the LED bits, the
// crossing lamp tasks own the bell bits
pub const LED_BIT_HOLDOVER_B1: u8 = 0;
pub const LED_BIT_HOLDOVER_B2: u8 = 1;
pub const OLATB_LED_MASK: u8 = 0x03;
pub const OLATB_BELL_MASK: u8 = 0x3C;

/////////////////////// SOUND CLIPS

pub const CLIP_WRECK: &str = "train-wreck";
pub const CLIP_ERROR: &str = "error-tone";
pub const CLIP_UNLOCK: &str = "unlock-tone";
/// Shutdown countdown, one clip per second: G, F, E, D, C, C an octave down.
pub const TONE_SEQUENCE: [&str; 6] = ["tone-g", "tone-f", "tone-e", "tone-d", "tone-c", "tone-c-low"];
pub const CLIP_VOLUME: u8 = 80;

/////////////////////// YARD ROUTES

use crate::api::TurnoutPos::{Close as C, Open as O};

pub struct YardEntry {
    pub key: &'static str,
    pub steps: &'static [(usize, TurnoutPos)],
}

/// Keyed by the two keypad digits. `Rfg` is the direct entry for from-track
/// `f` to to-track `g`; `rfg` is the mirror used when the previous
/// completed route was `Rgf` (the same physical path retraced); `Xff` sets
/// every turnout of track `f` to normal and is reached by keying the track
/// digit twice.
pub static YARD_ROUTES: &[YardEntry] = &[
    YardEntry { key: "R12", steps: &[(8, O), (9, C), (16, C)] },
    YardEntry { key: "R21", steps: &[(16, C), (9, C), (8, O), (10, O)] },
    YardEntry { key: "r12", steps: &[(10, O), (8, O), (9, C), (16, C)] },
    YardEntry { key: "r21", steps: &[(16, C), (9, C), (8, O)] },
    YardEntry { key: "R13", steps: &[(8, O), (9, C), (10, O), (17, O)] },
    YardEntry { key: "R31", steps: &[(17, O), (10, O), (9, C), (8, O), (16, O)] },
    YardEntry { key: "r13", steps: &[(16, O), (8, O), (9, C), (10, O), (17, O)] },
    YardEntry { key: "r31", steps: &[(17, O), (10, O), (9, C), (8, O)] },
    YardEntry { key: "R23", steps: &[(9, C), (10, C), (17, O), (16, C)] },
    YardEntry { key: "R32", steps: &[(16, C), (17, O), (10, C), (9, C), (8, O)] },
    YardEntry { key: "r23", steps: &[(8, O), (9, C), (10, C), (17, O), (16, C)] },
    YardEntry { key: "r32", steps: &[(16, C), (17, O), (10, C), (9, C)] },
    YardEntry { key: "R24", steps: &[(9, O), (10, C), (11, C), (18, C)] },
    YardEntry { key: "R42", steps: &[(18, C), (11, C), (10, C), (9, O), (8, O)] },
    YardEntry { key: "r24", steps: &[(8, O), (9, O), (10, C), (11, C), (18, C)] },
    YardEntry { key: "r42", steps: &[(18, C), (11, C), (10, C), (9, O)] },
    YardEntry { key: "R34", steps: &[(10, C), (11, C), (17, O), (18, C)] },
    YardEntry { key: "R43", steps: &[(18, C), (17, O), (11, C), (10, C), (8, O)] },
    YardEntry { key: "r34", steps: &[(8, O), (10, C), (11, C), (17, O), (18, C)] },
    YardEntry { key: "r43", steps: &[(18, C), (17, O), (11, C), (10, C)] },
    YardEntry { key: "R45", steps: &[(12, C), (13, C), (16, O), (18, O), (19, O), (23, C)] },
    YardEntry { key: "R54", steps: &[(23, C), (19, O), (18, O), (16, O), (13, C), (12, C), (8, O)] },
    YardEntry { key: "r45", steps: &[(8, O), (12, C), (13, C), (16, O), (18, O), (19, O), (23, C)] },
    YardEntry { key: "r54", steps: &[(23, C), (19, O), (18, O), (16, O), (13, C), (12, C)] },
    YardEntry { key: "R35", steps: &[(10, O), (12, C), (17, C), (19, O), (23, C)] },
    YardEntry { key: "R53", steps: &[(23, C), (19, O), (17, C), (12, C), (10, O), (8, O)] },
    YardEntry { key: "r35", steps: &[(8, O), (10, O), (12, C), (17, C), (19, O), (23, C)] },
    YardEntry { key: "r53", steps: &[(23, C), (19, O), (17, C), (12, C), (10, O)] },
    YardEntry { key: "R56", steps: &[(13, C), (14, C), (19, C), (24, O)] },
    YardEntry { key: "R65", steps: &[(24, O), (19, C), (14, C), (13, C), (8, O)] },
    YardEntry { key: "r56", steps: &[(8, O), (13, C), (14, C), (19, C), (24, O)] },
    YardEntry { key: "r65", steps: &[(24, O), (19, C), (14, C), (13, C)] },
    YardEntry { key: "R67", steps: &[(14, C), (15, C), (24, C), (25, O)] },
    YardEntry { key: "R76", steps: &[(25, O), (24, C), (15, C), (14, C), (8, O)] },
    YardEntry { key: "r67", steps: &[(8, O), (14, C), (15, C), (24, C), (25, O)] },
    YardEntry { key: "r76", steps: &[(25, O), (24, C), (15, C), (14, C)] },
    YardEntry { key: "R68", steps: &[(14, C), (20, O), (24, C), (26, O)] },
    YardEntry { key: "R86", steps: &[(26, O), (24, C), (20, O), (14, C), (8, O)] },
    YardEntry { key: "r68", steps: &[(8, O), (14, C), (20, O), (24, C), (26, O)] },
    YardEntry { key: "r86", steps: &[(26, O), (24, C), (20, O), (14, C)] },
    YardEntry { key: "R78", steps: &[(15, C), (20, O), (25, C), (26, O)] },
    YardEntry { key: "R87", steps: &[(26, O), (25, C), (20, O), (15, C), (8, O)] },
    YardEntry { key: "r78", steps: &[(8, O), (15, C), (20, O), (25, C), (26, O)] },
    YardEntry { key: "r87", steps: &[(26, O), (25, C), (20, O), (15, C)] },
    YardEntry { key: "X11", steps: &[(8, C), (9, O), (10, O), (16, O)] },
    YardEntry { key: "X22", steps: &[(9, O), (10, O), (16, O), (17, C)] },
    YardEntry { key: "X33", steps: &[(10, O), (11, O), (17, C), (18, O)] },
    YardEntry { key: "X44", steps: &[(11, O), (12, O), (13, O), (18, C)] },
    YardEntry { key: "X55", steps: &[(12, O), (13, O), (19, C), (23, O)] },
    YardEntry { key: "X66", steps: &[(13, O), (14, O), (19, O), (24, C)] },
    YardEntry { key: "X77", steps: &[(14, O), (15, O), (24, O), (25, C)] },
    YardEntry { key: "X88", steps: &[(15, O), (20, C), (25, O), (26, C)] },
];

pub fn yard_lookup(key: &str) -> Option<&'static [(usize, TurnoutPos)]> {
    YARD_ROUTES.iter().find(|e| e.key == key).map(|e| e.steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TurnoutKind;

    #[test]
    fn turnout_table_is_dense_and_valid() {
        for (i, t) in TURNOUTS.iter().enumerate() {
            assert_eq!(t.index, i + 1);
            assert!(t.min <= t.close && t.close <= t.max, "T{:02}", t.index);
            assert!(t.min <= t.middle && t.middle <= t.max, "T{:02}", t.index);
            assert!(t.min <= t.open && t.open <= t.max, "T{:02}", t.index);
            assert!(t.channel < 16);
            assert!(SERVO_BOARDS.contains(&t.addr));
        }
    }

    #[test]
    fn signal_bits_are_the_regular_pairs() {
        for s in SIGNALS.iter() {
            assert_eq!(s.bits.0, (s.index as u8 - 1) * 2);
            assert_eq!(s.bits.1, s.bits.0 + 1);
        }
        // the historically suspect entry: L11 is 20,21
        assert_eq!(signal_spec(11).bits, (20, 21));
    }

    #[test]
    fn semaphore_signals_point_at_semaphore_servos() {
        for s in SIGNALS.iter() {
            if let SignalKind::Semaphore(t) = s.kind {
                assert_eq!(turnout_spec(t).kind, TurnoutKind::Semaphore);
            }
        }
    }

    #[test]
    fn crossing_gates_are_gate_servos() {
        for c in CROSSINGS.iter() {
            for &g in c.gates {
                assert_eq!(turnout_spec(g).kind, TurnoutKind::Gate);
            }
        }
    }

    #[test]
    fn sensor_map_matches_bit_indexing() {
        for (i, s) in SENSOR_MAP.iter().enumerate() {
            let expect_chip = if i < 16 { 1 } else { 2 };
            assert_eq!(s.chip, expect_chip);
            assert_eq!(s.port, ((i % 16) / 8) as u8);
            assert_eq!(s.bit, (i % 8) as u8);
        }
    }

    #[test]
    fn aspect_rules_reference_real_wayside_signals() {
        for rule in ASPECT_RULES.iter() {
            for &s in rule.green.iter().chain(rule.yellow).chain(rule.red) {
                assert!(s >= 1 && s <= 12, "aspect rules may only color L01-L12");
            }
        }
    }

    #[test]
    fn mirror_entries_retrace_their_direct_route() {
        // r54 must be R45 in reverse order, pair for pair (and so on for
        // every mirror); this is what makes reverse traversal idempotent
        for e in YARD_ROUTES.iter().filter(|e| e.key.starts_with('r')) {
            let digits: Vec<char> = e.key[1..].chars().collect();
            let direct_key: String = format!("R{}{}", digits[1], digits[0]);
            let direct = yard_lookup(&direct_key).expect("mirror without direct");
            let mut rev: Vec<(usize, TurnoutPos)> = direct.to_vec();
            rev.reverse();
            assert_eq!(e.steps, rev.as_slice(), "{}", e.key);
        }
    }

    #[test]
    fn sensor_names_resolve_to_map_slots() {
        assert_eq!(sensor_index_by_name("B1"), Some(0));
        assert_eq!(sensor_index_by_name("B10"), Some(9));
        assert_eq!(sensor_index_by_name("S1"), Some(SENSOR_S1));
        assert_eq!(sensor_index_by_name("S9"), Some(SENSOR_S9));
        assert_eq!(sensor_index_by_name("GC2R"), Some(CROSSINGS[1].road));
        assert_eq!(sensor_index_by_name("GC1W"), Some(CROSSINGS[0].apr_west));
        assert_eq!(sensor_index_by_name("B11"), None);
        assert_eq!(sensor_index_by_name("GC3E"), None);
        assert_eq!(sensor_index_by_name("T05"), None);
    }

    #[test]
    fn olatb_partition_is_disjoint() {
        assert_eq!(OLATB_LED_MASK & OLATB_BELL_MASK, 0);
        for c in CROSSINGS.iter() {
            assert!(OLATB_BELL_MASK & (1 << c.bells.approach) != 0);
            assert!(OLATB_BELL_MASK & (1 << c.bells.road) != 0);
        }
    }
}
