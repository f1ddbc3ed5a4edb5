/// Local command recorder.
///
/// While armed, every outbound command is captured as a (relative time,
/// command) pair. The relative clock starts lazily at the first observed
/// command, not at arm time, so a capture always begins at t=0 regardless of
/// how long the operator hesitated after pressing record.

use std::time::{Duration, Instant};

/// One captured command, `at` relative to the first command of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEvent {
    pub at: Duration,
    pub command: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Armed,
}

#[derive(Debug, Default)]
pub struct Recorder {
    armed: bool,
    zero: Option<Instant>,
    events: Vec<RecordedEvent>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new capture, discarding any previous one.
    pub fn arm(&mut self) {
        self.armed = true;
        self.zero = None;
        self.events.clear();
    }

    /// Stop capturing. The accumulated sequence stays available for playback
    /// until the next `arm()`. Calling this twice is a no-op.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn state(&self) -> RecordingState {
        if self.armed {
            RecordingState::Armed
        } else {
            RecordingState::Idle
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Capture one outbound command. The first observation pins the relative
    /// zero; every observation (including the first) appends an event.
    pub fn observe(&mut self, command: char, now: Instant) {
        if !self.armed {
            return;
        }
        let zero = *self.zero.get_or_insert(now);
        self.events.push(RecordedEvent {
            at: now.saturating_duration_since(zero),
            command,
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Snapshot of the capture for playback. Playback works on the copy, so
    /// later recorder mutation cannot affect a running pass.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_times_start_at_zero() {
        let mut rec = Recorder::new();
        let t0 = Instant::now() + Duration::from_secs(1000);
        rec.arm();
        rec.observe('1', t0);
        rec.observe('d', t0 + Duration::from_millis(100));
        rec.observe('w', t0 + Duration::from_millis(500));

        let events = rec.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], RecordedEvent { at: Duration::ZERO, command: '1' });
        assert_eq!(events[1].at, Duration::from_millis(100));
        assert_eq!(events[2].at, Duration::from_millis(500));
    }

    #[test]
    fn test_observe_ignored_while_idle() {
        let mut rec = Recorder::new();
        rec.observe('d', Instant::now());
        assert!(rec.is_empty());
    }

    #[test]
    fn test_disarm_preserves_capture_and_is_idempotent() {
        let mut rec = Recorder::new();
        rec.arm();
        rec.observe('d', Instant::now());
        rec.disarm();
        rec.disarm();
        assert_eq!(rec.state(), RecordingState::Idle);
        assert_eq!(rec.len(), 1);

        // capture survives disarm, observe does nothing now
        rec.observe('a', Instant::now());
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_rearm_discards_previous_capture() {
        let mut rec = Recorder::new();
        rec.arm();
        rec.observe('d', Instant::now());
        rec.disarm();
        rec.arm();
        assert!(rec.is_empty());
    }
}
