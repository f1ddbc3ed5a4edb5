/// Arm controller: the single serialization point for semantic actions.
///
/// All mutable engine state (motion tracker, reverse log, recorder, servo
/// angle, selection) is owned here and only touched from the caller's thread.
/// Background work (playback, homing) runs on workers that talk back over
/// channels and send commands through the shared CommandPort, never through
/// controller state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::command_channel::{ChannelEvent, CommandPort};
use crate::commands::{
    step_delay_command, CMD_INFO, CMD_LOOP_TOGGLE, CMD_PLAY_START, CMD_PLAY_STOP,
    CMD_RECORD_START, CMD_RECORD_STOP, CMD_SERVO_STEP_DOWN, CMD_SERVO_STEP_UP, CMD_SERVO_ZERO,
    CMD_STOP, MARKER_LOOP_OFF, MARKER_LOOP_ON, MARKER_LOOP_PREFIX, MARKER_PLAY_OFF,
    MARKER_PLAY_ON, MARKER_RECORD_OFF, MARKER_RECORD_ON, SERVO_COARSE_STEP_DEG,
    SERVO_FINE_STEP_DEG,
};
use crate::config_loader::ArmSettings;
use crate::motion::{Direction, MotionTracker, MotorId, ServoAngle};
use crate::ops_log::OpsLog;
use crate::playback::{PlaybackOutcome, PlaybackScheduler, PlaybackState};
use crate::recorder::Recorder;
use crate::reverse_log::{ReverseAction, ReverseLog};
use crate::serial_link::SerialLink;

/// Pacing between commands when fanning out to several motors; gives the
/// firmware time to process each selection before the next character lands.
const INTER_COMMAND_DELAY: Duration = Duration::from_millis(5);

/// Everything the outside (display, console, tests) may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmEvent {
    LinkUp(String),
    LinkDown,
    /// One decoded device output line, passed through unchanged.
    DeviceText(String),
    /// Firmware-side recorder/playback/loop status, parsed from markers.
    RemoteRecording(bool),
    RemotePlayback(bool),
    RemoteLoop(bool),
    PlaybackFinished,
    PlaybackStopped,
    EmptyPlayback,
    NoMotorSelected,
    HomingStarted,
    HomingFinished,
    HomingStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HomingOutcome {
    Finished,
    Stopped,
}

pub struct ArmController {
    port: Arc<dyn CommandPort>,
    link: Option<Arc<SerialLink>>,
    events_rx: Receiver<ChannelEvent>,

    tracker: MotionTracker,
    reverse_log: ReverseLog,
    recorder: Recorder,
    servo: ServoAngle,
    selection: BTreeSet<MotorId>,

    playback: PlaybackScheduler,
    playback_rx: Receiver<PlaybackOutcome>,

    homing_tx: Sender<HomingOutcome>,
    homing_rx: Receiver<HomingOutcome>,
    homing_worker: Option<JoinHandle<()>>,
    homing_cancel: Option<Sender<()>>,

    ops_log: OpsLog,
    pending: Vec<ArmEvent>,
}

impl ArmController {
    pub fn new(
        port: Arc<dyn CommandPort>,
        events_rx: Receiver<ChannelEvent>,
        settings: &ArmSettings,
    ) -> Self {
        let (playback, playback_rx) = PlaybackScheduler::new();
        let (homing_tx, homing_rx) = unbounded();
        Self {
            port,
            link: None,
            events_rx,
            tracker: MotionTracker::new(),
            reverse_log: ReverseLog::new(),
            recorder: Recorder::new(),
            servo: ServoAngle::default(),
            selection: BTreeSet::new(),
            playback,
            playback_rx,
            homing_tx,
            homing_rx,
            homing_worker: None,
            homing_cancel: None,
            ops_log: OpsLog::new(&settings.ops_file),
            pending: Vec::new(),
        }
    }

    /// Attach the serial link so connect/disconnect actions reach it. The
    /// engine runs fine without one (tests drive a mock CommandPort).
    pub fn attach_link(&mut self, link: Arc<SerialLink>) {
        self.link = Some(link);
    }

    // --- connection actions ---

    pub fn request_connect(&mut self, port: &str) {
        self.ops_log.append(&format!("CONNECT {}", port));
        match &self.link {
            Some(link) => link.request_connect(port),
            None => warn!(target: "controller", "connect requested but no link attached"),
        }
    }

    pub fn disconnect(&mut self) {
        self.ops_log.append("DISCONNECT");
        if let Some(link) = &self.link {
            link.disconnect();
        }
    }

    // --- selection actions ---

    pub fn select_only(&mut self, motor: MotorId) {
        self.selection.clear();
        self.selection.insert(motor);
        self.send(motor.select_command());
        self.ops_log.append(&format!("SELECT M{}", motor.get()));
    }

    pub fn set_motor_selected(&mut self, motor: MotorId, selected: bool) {
        if selected {
            self.selection.insert(motor);
            self.ops_log.append(&format!("MOTOR M{} SELECTED", motor.get()));
        } else {
            self.selection.remove(&motor);
            self.ops_log.append(&format!("MOTOR M{} DESELECTED", motor.get()));
        }
    }

    pub fn select_all(&mut self) {
        for id in 1..=6 {
            if let Some(motor) = MotorId::new(id) {
                self.selection.insert(motor);
            }
        }
        self.ops_log.append("ALL MOTORS SELECTED");
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.ops_log.append("ALL MOTORS DESELECTED");
    }

    pub fn selection(&self) -> &BTreeSet<MotorId> {
        &self.selection
    }

    // --- motion actions ---

    /// Move every selected motor: steppers run in `direction` (opening or
    /// switching their segment), a selected servo takes a coarse +/-60 step.
    pub fn move_selected(&mut self, direction: Direction) {
        if self.selection.is_empty() {
            self.note_no_target();
            return;
        }
        let now = Instant::now();
        let motors: Vec<MotorId> = self.selection.iter().copied().collect();
        for motor in motors {
            self.send(motor.select_command());
            if motor.is_stepper() {
                if let Some(action) = self.tracker.start_or_switch(motor, direction, now) {
                    self.log_closed_segment(&action);
                    self.reverse_log.append(action);
                }
                self.ops_log.append(&format!(
                    "M{} START dir={:?}",
                    motor.get(),
                    direction
                ));
            } else {
                let delta = match direction {
                    Direction::Forward => SERVO_COARSE_STEP_DEG,
                    Direction::Backward => -SERVO_COARSE_STEP_DEG,
                };
                self.servo.step(delta);
                self.ops_log
                    .append(&format!("SERVO angle~{}", self.servo.degrees()));
            }
            self.send(direction.command());
            thread::sleep(INTER_COMMAND_DELAY);
        }
    }

    /// Stop every selected motor, closing stepper segments in processing
    /// order (ascending id), which fixes their order in the reverse log.
    pub fn stop_selected(&mut self) {
        if self.selection.is_empty() {
            self.note_no_target();
            return;
        }
        let now = Instant::now();
        let motors: Vec<MotorId> = self.selection.iter().copied().collect();
        for motor in motors {
            self.send(motor.select_command());
            if motor.is_stepper() {
                if let Some(action) = self.tracker.stop(motor, now) {
                    self.log_closed_segment(&action);
                    self.reverse_log.append(action);
                }
            }
            self.send(CMD_STOP);
            thread::sleep(INTER_COMMAND_DELAY);
        }
    }

    pub fn servo_step_up(&mut self) {
        self.servo_fine(CMD_SERVO_STEP_UP, SERVO_FINE_STEP_DEG);
    }

    pub fn servo_step_down(&mut self) {
        self.servo_fine(CMD_SERVO_STEP_DOWN, -SERVO_FINE_STEP_DEG);
    }

    pub fn servo_zero(&mut self) {
        if !self.selection.contains(&MotorId::SERVO) {
            self.note_no_target();
            return;
        }
        self.send(MotorId::SERVO.select_command());
        self.send(CMD_SERVO_ZERO);
        self.servo.zero();
        self.ops_log.append("SERVO angle~0");
    }

    fn servo_fine(&mut self, command: char, delta_deg: i16) {
        if !self.selection.contains(&MotorId::SERVO) {
            self.note_no_target();
            return;
        }
        self.send(MotorId::SERVO.select_command());
        self.send(command);
        self.servo.step(delta_deg);
        self.ops_log
            .append(&format!("SERVO angle~{}", self.servo.degrees()));
    }

    pub fn servo_angle_deg(&self) -> i16 {
        self.servo.degrees()
    }

    // --- firmware passthrough actions ---

    pub fn set_step_delay_us(&mut self, delay_us: u16) {
        let command = step_delay_command(delay_us);
        for ch in command.chars() {
            self.send(ch);
        }
        self.ops_log.append(&format!("STEP DELAY {}", command));
    }

    pub fn remote_record_start(&mut self) {
        self.send(CMD_RECORD_START);
        self.ops_log.append("REMOTE REC START");
    }

    pub fn remote_record_stop(&mut self) {
        self.send(CMD_RECORD_STOP);
        self.ops_log.append("REMOTE REC STOP");
    }

    pub fn remote_play_start(&mut self) {
        self.send(CMD_PLAY_START);
        self.ops_log.append("REMOTE PLAY START");
    }

    pub fn remote_play_stop(&mut self) {
        self.send(CMD_PLAY_STOP);
        self.ops_log.append("REMOTE PLAY STOP");
    }

    pub fn remote_loop_toggle(&mut self) {
        self.send(CMD_LOOP_TOGGLE);
        self.ops_log.append("REMOTE LOOP TOGGLE");
    }

    pub fn request_info(&mut self) {
        self.send(CMD_INFO);
        self.ops_log.append("INFO REQUEST");
    }

    // --- local recording / playback ---

    pub fn arm_recorder(&mut self) {
        self.recorder.arm();
        self.ops_log.append("LOCAL REC ARMED");
    }

    pub fn disarm_recorder(&mut self) {
        self.recorder.disarm();
        self.ops_log.append("LOCAL REC DISARMED");
    }

    pub fn recorder_armed(&self) -> bool {
        self.recorder.is_armed()
    }

    pub fn recorded_len(&self) -> usize {
        self.recorder.len()
    }

    /// Replay the current capture. The scheduler gets a snapshot, so the
    /// recorder can be re-armed while playback runs.
    pub fn start_playback(&mut self, looping: bool) {
        let events = self.recorder.events();
        if events.is_empty() {
            info!(target: "controller", "playback requested with no recorded events");
            self.ops_log.append("PLAY EMPTY");
            self.pending.push(ArmEvent::EmptyPlayback);
            return;
        }
        let port = Arc::clone(&self.port);
        self.playback
            .start(events, looping, move |c| port.send_command(c));
        self.ops_log.append(&format!("PLAY START loop={}", looping));
    }

    pub fn stop_playback(&mut self) {
        self.playback.cancel();
        self.ops_log.append("PLAY STOP REQUESTED");
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    // --- homing / reset ---

    /// Return the arm to its pre-session pose: servo straight to zero, then
    /// every recorded stepper segment undone in reverse chronological order
    /// on a dedicated worker (the per-segment waits must not block this
    /// thread). Afterwards the reverse log is empty and all segments closed.
    pub fn return_to_home(&mut self) {
        if self.homing_active() {
            info!(target: "controller", "homing already in progress");
            return;
        }

        self.send_unrecorded(MotorId::SERVO.select_command());
        self.send_unrecorded(CMD_SERVO_ZERO);
        self.servo.zero();
        self.ops_log.append("SERVO -> 0");

        let actions = self.reverse_log.drain();
        self.tracker.clear();
        self.pending.push(ArmEvent::HomingStarted);

        if actions.is_empty() {
            self.ops_log.append("HOME DONE");
            self.pending.push(ArmEvent::HomingFinished);
            return;
        }

        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        self.homing_cancel = Some(cancel_tx);
        let port = Arc::clone(&self.port);
        let done_tx = self.homing_tx.clone();
        let ops = self.ops_log.clone();
        let spawned = thread::Builder::new()
            .name("homing".to_string())
            .spawn(move || homing_worker(&actions, port.as_ref(), &cancel_rx, &done_tx, &ops));
        match spawned {
            Ok(handle) => self.homing_worker = Some(handle),
            Err(e) => {
                warn!(target: "controller", "failed to spawn homing worker: {}", e);
                self.homing_cancel = None;
                self.pending.push(ArmEvent::HomingStopped);
            }
        }
    }

    /// Ask a running homing pass to stop after its current segment.
    pub fn cancel_homing(&mut self) {
        if let Some(cancel_tx) = self.homing_cancel.take() {
            let _ = cancel_tx.try_send(());
        }
    }

    pub fn homing_active(&self) -> bool {
        self.homing_worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Clear all undo bookkeeping and truncate the operations file. Sends
    /// nothing to the device.
    pub fn reset(&mut self) {
        self.reverse_log.clear();
        self.tracker.clear();
        self.servo.zero();
        self.ops_log.reset();
        self.ops_log.append("RESET");
    }

    pub fn reverse_log_len(&self) -> usize {
        self.reverse_log.len()
    }

    pub fn has_open_segment(&self, motor: MotorId) -> bool {
        self.tracker.has_open_segment(motor)
    }

    // --- inbound event pump ---

    /// Drain everything that happened since the last call: informational
    /// events from actions, link/channel events (with firmware status marker
    /// parsing), playback outcomes and homing outcomes.
    pub fn poll(&mut self) -> Vec<ArmEvent> {
        let mut out = std::mem::take(&mut self.pending);

        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                ChannelEvent::Connected(port) => {
                    self.ops_log.append(&format!("CONNECTED {}", port));
                    out.push(ArmEvent::LinkUp(port));
                }
                ChannelEvent::Disconnected => {
                    self.ops_log.append("DISCONNECTED");
                    out.push(ArmEvent::LinkDown);
                }
                ChannelEvent::Text(text) => {
                    if let Some(status) = parse_status_marker(&text) {
                        out.push(status);
                    }
                    out.push(ArmEvent::DeviceText(text));
                }
            }
        }

        while let Ok(outcome) = self.playback_rx.try_recv() {
            out.push(match outcome {
                PlaybackOutcome::Finished => ArmEvent::PlaybackFinished,
                PlaybackOutcome::Stopped => ArmEvent::PlaybackStopped,
            });
        }

        while let Ok(outcome) = self.homing_rx.try_recv() {
            if let Some(handle) = self.homing_worker.take() {
                let _ = handle.join();
            }
            self.homing_cancel = None;
            out.push(match outcome {
                HomingOutcome::Finished => ArmEvent::HomingFinished,
                HomingOutcome::Stopped => ArmEvent::HomingStopped,
            });
        }

        out
    }

    /// Stop background workers. Bounded by at most one remaining homing wait.
    pub fn shutdown(&mut self) {
        self.playback.stop();
        self.cancel_homing();
        if let Some(handle) = self.homing_worker.take() {
            let _ = handle.join();
        }
    }

    // --- internals ---

    /// The one outbound path for user-issued commands: wire, recorder, ops.
    fn send(&mut self, command: char) {
        self.port.send_command(command);
        if self.recorder.is_armed() {
            self.recorder.observe(command, Instant::now());
        }
        self.ops_log.append(&format!("SEND {}", command));
    }

    /// Outbound path that bypasses the recorder; used by homing so an armed
    /// capture never contains its own undo.
    fn send_unrecorded(&mut self, command: char) {
        self.port.send_command(command);
        self.ops_log.append(&format!("SEND {}", command));
    }

    fn note_no_target(&mut self) {
        debug!(target: "controller", "command issued with no matching motor selected");
        self.ops_log.append("NO MOTORS SELECTED");
        self.pending.push(ArmEvent::NoMotorSelected);
    }

    fn log_closed_segment(&self, action: &ReverseAction) {
        self.ops_log.append(&format!(
            "M{} STOP duration={}ms",
            action.motor.get(),
            action.duration.as_millis()
        ));
    }
}

impl Drop for ArmController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Undo one recorded segment per iteration, most recent first. The wait is a
/// blocking recv_timeout on the cancel channel, so a cancel lands at the next
/// segment boundary at the latest and the moving motor still gets its stop.
fn homing_worker(
    actions: &[ReverseAction],
    port: &dyn CommandPort,
    cancel_rx: &Receiver<()>,
    done_tx: &Sender<HomingOutcome>,
    ops: &OpsLog,
) {
    for action in actions.iter().rev() {
        port.send_command(action.motor.select_command());
        port.send_command(action.direction.command());
        match cancel_rx.recv_timeout(action.duration) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                port.send_command(CMD_STOP);
                ops.append("HOME ABORTED");
                let _ = done_tx.send(HomingOutcome::Stopped);
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        port.send_command(CMD_STOP);
    }
    ops.append("HOME DONE");
    let _ = done_tx.send(HomingOutcome::Finished);
}

fn parse_status_marker(text: &str) -> Option<ArmEvent> {
    let lower = text.to_lowercase();
    if lower.contains(MARKER_RECORD_ON) {
        Some(ArmEvent::RemoteRecording(true))
    } else if lower.contains(MARKER_RECORD_OFF) {
        Some(ArmEvent::RemoteRecording(false))
    } else if lower.contains(MARKER_PLAY_ON) {
        Some(ArmEvent::RemotePlayback(true))
    } else if lower.contains(MARKER_PLAY_OFF) {
        Some(ArmEvent::RemotePlayback(false))
    } else if lower.contains(MARKER_LOOP_PREFIX) && lower.contains(MARKER_LOOP_ON) {
        Some(ArmEvent::RemoteLoop(true))
    } else if lower.contains(MARKER_LOOP_PREFIX) && lower.contains(MARKER_LOOP_OFF) {
        Some(ArmEvent::RemoteLoop(false))
    } else {
        None
    }
}
