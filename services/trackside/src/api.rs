//! Shared types and timing constants. Every worker's command enum lives
//! here, next to the records the main loop and the workers exchange, so a
//! single module defines the whole inter-task vocabulary.

use std::time::Duration;

/////////////////////// DISPLAYED COLORS

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Off,
    Red,
    Green,
    Yellow,
}

impl Color {
    /// Short form used by the status snapshot files.
    pub fn snapshot(&self) -> &'static str {
        match self {
            Color::Off => "Off",
            Color::Red => "Red",
            Color::Green => "Grn",
            Color::Yellow => "Yel",
        }
    }
}

/////////////////////// TURNOUTS

/// The three commandable endpoints of a turnout servo. `Middle` is only a
/// meaningful target for semaphores (the yellow flag angle) but every
/// record carries all three.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnoutPos {
    Open,
    Middle,
    Close,
}

/// What the servo actuates. Gates and semaphores get the ambient
/// temperature correction applied to their endpoint targets; plain points
/// do not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnoutKind {
    Point,
    Gate,
    Semaphore,
}

/// Completion message published by a motion stepper thread. The main loop
/// consumes these and updates the turnout table authoritatively.
#[derive(Clone, Copy, Debug)]
pub struct MotionEvent {
    pub turnout: usize,
    pub final_pulse: u16,
    pub outcome: MotionOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionOutcome {
    Completed,
    /// Stepper observed its cancel flag and stopped early.
    Cancelled,
    /// A channel write failed; the move aborted at the last good pulse.
    BusFault,
}

/////////////////////// SIGNAL SHIFT REGISTER

/// Masked update of the two weave frames. The worker applies
/// `frame := (frame & mask... )` between shift-outs so a color change is
/// never torn across a weave pair. `mask` has 1s on the bits being written.
#[derive(Clone, Copy, Debug)]
pub enum SignalCmd {
    Update { mask: u32, data_a: u32, data_b: u32 },
    AllDark,
    Quit,
}

/////////////////////// GRADE CROSSINGS

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradeState {
    Idle,
    GateLower,
    Approach,
    Road,
    GateRaise,
    Depart,
}

impl GradeState {
    pub fn snapshot(&self) -> &'static str {
        match self {
            GradeState::Idle => "idle",
            GradeState::GateLower => "gateLower",
            GradeState::Approach => "approach",
            GradeState::Road => "road",
            GradeState::GateRaise => "gateRaise",
            GradeState::Depart => "depart",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BellKind {
    Approach,
    Road,
}

/// Commands for a crossing's lamp/bell worker.
#[derive(Clone, Copy, Debug)]
pub enum LampCmd {
    Start(BellKind),
    Stop,
    Quit,
}

/////////////////////// OPERATOR INPUT

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldoverRoute {
    B1In,
    B2In,
    B1Out,
    B2Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonId {
    Holdover(HoldoverRoute),
    MidwayT05,
    MidwayT06,
    WyeClose,
    WyeOpen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Press {
    Single,
    Double,
}

#[derive(Clone, Copy, Debug)]
pub struct ButtonEvent {
    pub id: ButtonId,
    pub press: Press,
}

/// A decoded keypad digit, '0'..='F'.
#[derive(Clone, Copy, Debug)]
pub struct KeyEvent(pub char);

/////////////////////// SECTION STATE

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Siding {
    B1,
    B2,
}

/////////////////////// TIMING

pub const MAIN_TICK: Duration = Duration::from_millis(90);
pub const MOTION_TICK: Duration = Duration::from_millis(20);
/// Steps per second a motion task takes; `rate / MOTION_STEPS_PER_SEC` is
/// the per-tick pulse increment.
pub const MOTION_STEPS_PER_SEC: u16 = 50;

pub const WEAVE_HOLD_A: Duration = Duration::from_millis(6);
pub const WEAVE_HOLD_B: Duration = Duration::from_millis(19);
pub const WEAVE_IDLE: Duration = Duration::from_millis(250);

pub const KEYPAD_PERIOD: Duration = Duration::from_millis(100);
pub const KEYPAD_SETTLE: Duration = Duration::from_millis(20);
pub const BUTTON_PERIOD: Duration = Duration::from_millis(50);
pub const LAMP_PERIOD: Duration = Duration::from_millis(800);
pub const MIRROR_PERIOD: Duration = Duration::from_millis(250);

/// Generic button scanner double-press window.
pub const DOUBLE_PRESS_WINDOW: Duration = Duration::from_secs(1);
/// Midway lock confirmation window. Deliberately distinct from the generic
/// window; see DESIGN.md.
pub const MIDWAY_LOCK_WINDOW: Duration = Duration::from_millis(500);

pub const MOTION_WAIT: Duration = Duration::from_secs(10);
pub const SHUTDOWN_MOTION_WAIT: Duration = Duration::from_secs(6);

pub const GATE_DELAY: Duration = Duration::from_millis(500);
pub const APPROACH_TIMEOUT: Duration = Duration::from_secs(10);
pub const ROAD_LINGER: Duration = Duration::from_secs(1);
pub const DEPART_LINGER: Duration = Duration::from_secs(1);

pub const HOLDOVER_S1_SUPPRESS: Duration = Duration::from_secs(10);
pub const HOLDOVER_EXIT_SUPPRESS: Duration = Duration::from_secs(3);
pub const ROUTE_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
pub const MIDWAY_RESET_DELAY: Duration = Duration::from_secs(15);
pub const WYE_SUPPRESS: Duration = Duration::from_secs(2);

pub const TEMP_REFRESH: Duration = Duration::from_secs(300);
/// Status snapshot publishes every this many main-loop iterations.
pub const SNAPSHOT_EVERY: u32 = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_names() {
        assert_eq!(Color::Yellow.snapshot(), "Yel");
        assert_eq!(GradeState::GateRaise.snapshot(), "gateRaise");
    }

    #[test]
    fn lock_window_is_tighter_than_double_press() {
        assert!(MIDWAY_LOCK_WINDOW < DOUBLE_PRESS_WINDOW);
    }
}
