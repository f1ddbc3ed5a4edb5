/// Motion bookkeeping for the arm's motors.
///
/// Steppers have no position feedback; the only way to undo motion is to
/// remember how long each motor ran in which direction. MotionTracker keeps
/// one optional open segment per stepper and turns every closed segment into
/// a ReverseAction for the reverse log. The servo is different: it holds an
/// absolute angle and never has segments.

use std::time::Instant;

use crate::commands::{CMD_BACKWARD, CMD_FORWARD};
use crate::reverse_log::ReverseAction;

/// Number of steppers on the arm (ids 1..=5). Motor 6 is the servo.
pub const STEPPER_COUNT: usize = 5;

/// A motor id as used on the wire: '1'..'5' select a stepper, '6' the servo.
/// The valid set is fixed firmware configuration, not discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MotorId(u8);

impl MotorId {
    pub const SERVO: MotorId = MotorId(6);

    /// Build a motor id, rejecting anything outside 1..=6.
    pub fn new(id: u8) -> Option<Self> {
        if (1..=6).contains(&id) {
            Some(MotorId(id))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_stepper(self) -> bool {
        self.0 <= STEPPER_COUNT as u8
    }

    pub fn is_servo(self) -> bool {
        self == Self::SERVO
    }

    /// The single-character selection command for this motor.
    pub fn select_command(self) -> char {
        (b'0' + self.0) as char
    }

    /// Zero-based index into per-stepper arrays. Callers must only use this
    /// for steppers.
    fn stepper_index(self) -> usize {
        debug_assert!(self.is_stepper());
        (self.0 - 1) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn inverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    /// The motion command character for this direction.
    pub fn command(self) -> char {
        match self {
            Direction::Forward => CMD_FORWARD,
            Direction::Backward => CMD_BACKWARD,
        }
    }
}

/// An open motion segment: the stepper has been running in `direction`
/// since `started` and has not been stopped yet.
#[derive(Debug, Clone, Copy)]
struct Segment {
    started: Instant,
    direction: Direction,
}

/// Per-stepper open-segment tracking.
///
/// Invariant: at most one open segment per motor. Starting a new direction on
/// a motor that is already moving closes the old segment first, so direction
/// changes without an explicit stop never lose their undo record.
#[derive(Debug, Default)]
pub struct MotionTracker {
    segments: [Option<Segment>; STEPPER_COUNT],
}

impl MotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a segment for `motor`, closing any previous one. Returns the
    /// reverse action of the closed segment, if there was one. Non-stepper
    /// ids are ignored (the servo has no segments).
    pub fn start_or_switch(
        &mut self,
        motor: MotorId,
        direction: Direction,
        now: Instant,
    ) -> Option<ReverseAction> {
        if !motor.is_stepper() {
            return None;
        }
        let closed = self.close(motor, now);
        self.segments[motor.stepper_index()] = Some(Segment {
            started: now,
            direction,
        });
        closed
    }

    /// Close the open segment for `motor`, if any. Stopping a motor that is
    /// not moving is a no-op.
    pub fn stop(&mut self, motor: MotorId, now: Instant) -> Option<ReverseAction> {
        if !motor.is_stepper() {
            return None;
        }
        self.close(motor, now)
    }

    pub fn has_open_segment(&self, motor: MotorId) -> bool {
        motor.is_stepper() && self.segments[motor.stepper_index()].is_some()
    }

    pub fn open_segment_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_some()).count()
    }

    /// Discard all open segments without emitting reverse actions.
    pub fn clear(&mut self) {
        self.segments = Default::default();
    }

    fn close(&mut self, motor: MotorId, now: Instant) -> Option<ReverseAction> {
        let segment = self.segments[motor.stepper_index()].take()?;
        // saturating: clamp against clock anomalies instead of panicking
        let duration = now.saturating_duration_since(segment.started);
        Some(ReverseAction {
            motor,
            direction: segment.direction.inverse(),
            duration,
        })
    }
}

/// Servo angle memory, clamped to the physical range on every update.
/// The servo is moved by absolute/relative angle commands, not timed
/// segments, so homing just resets it to zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServoAngle {
    degrees: i16,
}

pub const SERVO_MAX_ANGLE_DEG: i16 = 180;

impl ServoAngle {
    pub fn degrees(self) -> i16 {
        self.degrees
    }

    pub fn step(&mut self, delta_deg: i16) {
        self.degrees = (self.degrees + delta_deg).clamp(0, SERVO_MAX_ANGLE_DEG);
    }

    pub fn zero(&mut self) {
        self.degrees = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn m(id: u8) -> MotorId {
        MotorId::new(id).unwrap()
    }

    #[test]
    fn test_motor_id_ranges() {
        assert!(MotorId::new(0).is_none());
        assert!(MotorId::new(7).is_none());
        assert!(m(1).is_stepper());
        assert!(m(5).is_stepper());
        assert!(m(6).is_servo());
        assert_eq!(m(3).select_command(), '3');
        assert_eq!(MotorId::SERVO.select_command(), '6');
    }

    #[test]
    fn test_stop_without_segment_is_noop() {
        let mut tracker = MotionTracker::new();
        assert!(tracker.stop(m(2), Instant::now()).is_none());
        assert_eq!(tracker.open_segment_count(), 0);
    }

    #[test]
    fn test_start_then_stop_yields_inverse_action() {
        let mut tracker = MotionTracker::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(400);

        assert!(tracker.start_or_switch(m(2), Direction::Forward, t0).is_none());
        assert!(tracker.has_open_segment(m(2)));

        let action = tracker.stop(m(2), t1).expect("segment should close");
        assert_eq!(action.motor, m(2));
        assert_eq!(action.direction, Direction::Backward);
        assert_eq!(action.duration, Duration::from_millis(400));
        assert!(!tracker.has_open_segment(m(2)));
    }

    #[test]
    fn test_direction_switch_closes_old_segment() {
        let mut tracker = MotionTracker::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(100);
        let t2 = t1 + Duration::from_millis(250);

        tracker.start_or_switch(m(1), Direction::Forward, t0);
        let switched = tracker
            .start_or_switch(m(1), Direction::Backward, t1)
            .expect("old segment must close on direction change");
        // the action undoes the *old* (Forward) segment
        assert_eq!(switched.direction, Direction::Backward);
        assert_eq!(switched.duration, Duration::from_millis(100));

        // only one open segment at any time
        assert_eq!(tracker.open_segment_count(), 1);

        let stopped = tracker.stop(m(1), t2).unwrap();
        assert_eq!(stopped.direction, Direction::Forward);
        assert_eq!(stopped.duration, Duration::from_millis(250));
    }

    #[test]
    fn test_motors_tracked_independently() {
        let mut tracker = MotionTracker::new();
        let t0 = Instant::now();
        tracker.start_or_switch(m(1), Direction::Forward, t0);
        tracker.start_or_switch(m(4), Direction::Backward, t0);
        assert_eq!(tracker.open_segment_count(), 2);

        tracker.stop(m(4), t0 + Duration::from_millis(10));
        assert!(tracker.has_open_segment(m(1)));
        assert!(!tracker.has_open_segment(m(4)));
    }

    #[test]
    fn test_duration_clamped_against_clock_anomaly() {
        let mut tracker = MotionTracker::new();
        let t0 = Instant::now();
        tracker.start_or_switch(m(3), Direction::Forward, t0 + Duration::from_millis(50));
        // "now" earlier than the segment start: duration clamps to zero
        let action = tracker.stop(m(3), t0).unwrap();
        assert_eq!(action.duration, Duration::ZERO);
    }

    #[test]
    fn test_servo_has_no_segments() {
        let mut tracker = MotionTracker::new();
        assert!(tracker
            .start_or_switch(MotorId::SERVO, Direction::Forward, Instant::now())
            .is_none());
        assert_eq!(tracker.open_segment_count(), 0);
    }

    #[test]
    fn test_servo_angle_clamps() {
        let mut angle = ServoAngle::default();
        angle.step(-15);
        assert_eq!(angle.degrees(), 0);
        angle.step(60);
        angle.step(60);
        angle.step(60);
        angle.step(60);
        assert_eq!(angle.degrees(), SERVO_MAX_ANGLE_DEG);
        angle.zero();
        assert_eq!(angle.degrees(), 0);
    }
}
