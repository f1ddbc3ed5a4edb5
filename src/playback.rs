/// Timed replay of a recorded command sequence.
///
/// The scheduler runs each pass on a dedicated worker thread so replay never
/// blocks command issuance or inbound processing. Waits are computed against
/// the pass start instant (drift-compensated, not naive fixed sleeps) and are
/// implemented as a blocking `recv_timeout` on a per-run cancel channel, so a
/// cancel request is observed at the next wait boundary without spinning.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::recorder::RecordedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Running { looping: bool },
    Cancelling,
}

/// How a playback run ended. A cancelled run reports `Stopped`, never
/// `Finished`, even if the cancel landed on the last wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Stopped,
}

pub struct PlaybackScheduler {
    worker: Option<JoinHandle<()>>,
    cancel_tx: Option<Sender<()>>,
    state: Arc<Mutex<PlaybackState>>,
    outcome_tx: Sender<PlaybackOutcome>,
}

impl PlaybackScheduler {
    /// Create the scheduler plus the receiver on which run outcomes arrive.
    pub fn new() -> (Self, Receiver<PlaybackOutcome>) {
        let (outcome_tx, outcome_rx) = unbounded();
        (
            Self {
                worker: None,
                cancel_tx: None,
                state: Arc::new(Mutex::new(PlaybackState::Idle)),
                outcome_tx,
            },
            outcome_rx,
        )
    }

    pub fn state(&self) -> PlaybackState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(PlaybackState::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.state() != PlaybackState::Idle
    }

    /// Start replaying `events` through `send`. Any playback still running is
    /// cancelled and fully joined first; two passes never run concurrently.
    /// An empty event set reports `Finished` immediately without a thread.
    pub fn start<F>(&mut self, mut events: Vec<RecordedEvent>, looping: bool, send: F)
    where
        F: Fn(char) + Send + 'static,
    {
        self.cancel();
        self.join_worker();

        // stable sort: ties keep their original capture order
        events.sort_by_key(|e| e.at);

        if events.is_empty() {
            debug!(target: "playback", "nothing to play");
            let _ = self.outcome_tx.send(PlaybackOutcome::Finished);
            return;
        }

        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        self.cancel_tx = Some(cancel_tx);
        self.set_state(PlaybackState::Running { looping });

        let state = Arc::clone(&self.state);
        let outcome_tx = self.outcome_tx.clone();
        info!(target: "playback", "starting playback: {} events, loop={}", events.len(), looping);

        let worker = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let outcome = run_passes(&events, looping, &cancel_rx, &send);
                if let Ok(mut s) = state.lock() {
                    *s = PlaybackState::Idle;
                }
                info!(target: "playback", "playback {:?}", outcome);
                let _ = outcome_tx.send(outcome);
            });

        match worker {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                warn!(target: "playback", "failed to spawn playback worker: {}", e);
                self.cancel_tx = None;
                self.set_state(PlaybackState::Idle);
                let _ = self.outcome_tx.send(PlaybackOutcome::Stopped);
            }
        }
    }

    /// Request cancellation of the running playback. No-op when idle. The
    /// worker observes the request at its next wait boundary.
    pub fn cancel(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            if self.state() != PlaybackState::Idle {
                self.set_state(PlaybackState::Cancelling);
            }
            // the worker also treats a dropped sender as a cancel request
            let _ = cancel_tx.try_send(());
        }
    }

    /// Cancel and wait for the worker to exit.
    pub fn stop(&mut self) {
        self.cancel();
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!(target: "playback", "playback worker panicked");
            }
        }
    }

    fn set_state(&self, new: PlaybackState) {
        if let Ok(mut s) = self.state.lock() {
            *s = new;
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_passes<F>(
    events: &[RecordedEvent],
    looping: bool,
    cancel_rx: &Receiver<()>,
    send: &F,
) -> PlaybackOutcome
where
    F: Fn(char),
{
    loop {
        let pass_start = Instant::now();
        for event in events {
            // drift-compensated: wait against real elapsed time of this pass
            let wait = event.at.saturating_sub(pass_start.elapsed());
            match cancel_rx.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    return PlaybackOutcome::Stopped;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            send(event.command);
        }
        if !looping {
            return PlaybackOutcome::Finished;
        }
        // catch a cancel that landed exactly between passes
        if cancel_rx.try_recv().is_ok() {
            return PlaybackOutcome::Stopped;
        }
    }
}
