/// Ordered record of reverse actions, consumed by the homing procedure.
///
/// Append order is chronological order; entries are never mutated after
/// append. Homing walks the log back-to-front so the most recent motion is
/// undone first, then clears it. Reset clears it wholesale.

use std::time::Duration;

use crate::motion::{Direction, MotorId};

/// The undo record of one closed segment: replay `direction` on `motor` for
/// `duration` to take back the original motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseAction {
    pub motor: MotorId,
    /// Inverse of the direction the segment originally ran in.
    pub direction: Direction,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct ReverseLog {
    actions: Vec<ReverseAction>,
}

impl ReverseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, action: ReverseAction) {
        self.actions.push(action);
    }

    /// Take the whole log, oldest first (most recent last).
    pub fn drain(&mut self) -> Vec<ReverseAction> {
        std::mem::take(&mut self.actions)
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(motor: u8, millis: u64) -> ReverseAction {
        ReverseAction {
            motor: MotorId::new(motor).unwrap(),
            direction: Direction::Backward,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_drain_preserves_append_order() {
        let mut log = ReverseLog::new();
        log.append(action(1, 100));
        log.append(action(3, 50));
        log.append(action(1, 200));
        assert_eq!(log.len(), 3);

        let drained = log.drain();
        assert_eq!(
            drained.iter().map(|a| a.motor.get()).collect::<Vec<_>>(),
            vec![1, 3, 1]
        );
        assert_eq!(drained[2].duration, Duration::from_millis(200));
        assert!(log.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut log = ReverseLog::new();
        log.append(action(2, 10));
        log.clear();
        assert!(log.is_empty());
        assert!(log.drain().is_empty());
    }
}
