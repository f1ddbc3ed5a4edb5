/// Command alphabet for the arm firmware.
///
/// Single ASCII characters, no terminator. The encoding is fixed by the
/// firmware; nothing here is negotiable at runtime.

/// Step forward, or +60 degrees on the servo.
pub const CMD_FORWARD: char = 'd';
/// Step backward, or -60 degrees on the servo.
pub const CMD_BACKWARD: char = 'a';
/// Stop the selected stepper (hold on the servo).
pub const CMD_STOP: char = 'w';
/// Servo +15 degrees.
pub const CMD_SERVO_STEP_UP: char = '[';
/// Servo -15 degrees.
pub const CMD_SERVO_STEP_DOWN: char = ']';
/// Servo to absolute 0 degrees.
pub const CMD_SERVO_ZERO: char = 'c';

/// Firmware-side recorder start/stop.
pub const CMD_RECORD_START: char = 'R';
pub const CMD_RECORD_STOP: char = 'T';
/// Firmware-side playback start/stop.
pub const CMD_PLAY_START: char = 'P';
pub const CMD_PLAY_STOP: char = 'S';
/// Firmware-side loop toggle.
pub const CMD_LOOP_TOGGLE: char = 'L';
/// Info request; the firmware answers with free-form text lines.
pub const CMD_INFO: char = 'V';

/// Prefix for the step-delay command: 'Z' followed by exactly four digits
/// of microseconds, e.g. Z0400.
pub const CMD_STEP_DELAY_PREFIX: char = 'Z';

/// Step-delay range accepted by the firmware (microseconds).
pub const STEP_DELAY_MIN_US: u16 = 150;
pub const STEP_DELAY_MAX_US: u16 = 4000;

/// Servo move sizes in degrees.
pub const SERVO_COARSE_STEP_DEG: i16 = 60;
pub const SERVO_FINE_STEP_DEG: i16 = 15;

// Status marker substrings the firmware prints on its log lines. Matching is
// case-insensitive substring containment, not strict parsing; the firmware
// messages are Turkish and are reproduced here verbatim.
pub const MARKER_RECORD_ON: &str = "[rec] kayit basladi";
pub const MARKER_RECORD_OFF: &str = "[rec] kayit durdu";
pub const MARKER_PLAY_ON: &str = "[play] oynatma basladi";
pub const MARKER_PLAY_OFF: &str = "[play] oynatma durdu";
pub const MARKER_LOOP_PREFIX: &str = "loop:";
pub const MARKER_LOOP_ON: &str = "acik";
pub const MARKER_LOOP_OFF: &str = "kapali";

/// Format a step delay as the five characters the firmware expects.
/// The value is clamped to the supported range first.
pub fn step_delay_command(delay_us: u16) -> String {
    let clamped = delay_us.clamp(STEP_DELAY_MIN_US, STEP_DELAY_MAX_US);
    format!("{}{:04}", CMD_STEP_DELAY_PREFIX, clamped)
}
