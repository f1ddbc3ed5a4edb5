/// Serial link to the arm controller board.
///
/// One background worker owns the whole connection lifecycle: it sits idle
/// until a port is requested, makes exactly one connection attempt per
/// request, and while connected pumps inbound bytes to listeners. The device
/// resets its MCU whenever the port is opened, so a successful open is
/// followed by a fixed settle delay before the link is declared usable.
///
/// Nothing here auto-retries: a failed attempt or a dropped connection
/// returns the link to Idle and waits for the next explicit request.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use serialport::SerialPort;

/// Poll interval while no port is requested.
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Poll interval between read attempts while connected.
const READ_POLL: Duration = Duration::from_millis(10);
/// Fixed delay after opening the port, for the device's reset-on-open.
const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Backoff after an I/O error before resuming the idle poll.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting(String),
    Connected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected(String),
    Disconnected,
    /// Raw inbound bytes; decoding happens one layer up.
    Data(Vec<u8>),
}

struct Shared {
    baud: u32,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    requested: Mutex<Option<String>>,
    state: Mutex<ConnectionState>,
    stop: AtomicBool,
    event_tx: Sender<LinkEvent>,
}

impl Shared {
    fn set_state(&self, new: ConnectionState) {
        if let Ok(mut state) = self.state.lock() {
            *state = new;
        }
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Close the handle if one is open. Returns whether there was one.
    fn close_port(&self) -> bool {
        self.port
            .lock()
            .map(|mut guard| guard.take().is_some())
            .unwrap_or(false)
    }

    fn has_port(&self) -> bool {
        self.port.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Drop the connection after an I/O failure and tell listeners.
    fn fail_connection(&self, context: &str, err: &std::io::Error) {
        warn!(target: "serial_link", "{}: {}", context, err);
        self.close_port();
        self.set_state(ConnectionState::Idle);
        self.emit(LinkEvent::Disconnected);
    }
}

pub struct SerialLink {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialLink {
    /// Spawn the link worker. Events (connects, disconnects, inbound data)
    /// arrive on the returned receiver.
    pub fn start(baud: u32) -> (Self, Receiver<LinkEvent>) {
        let (event_tx, event_rx) = unbounded();
        let shared = Arc::new(Shared {
            baud,
            port: Mutex::new(None),
            requested: Mutex::new(None),
            state: Mutex::new(ConnectionState::Idle),
            stop: AtomicBool::new(false),
            event_tx,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("serial-link".to_string())
            .spawn(move || worker_loop(worker_shared))
            .ok();
        if worker.is_none() {
            warn!(target: "serial_link", "failed to spawn link worker");
        }

        (
            Self {
                shared,
                worker: Mutex::new(worker),
            },
            event_rx,
        )
    }

    /// Ask the worker to connect to `port`. Any current connection is closed
    /// first. Exactly one attempt is made; a failure requires a fresh request.
    pub fn request_connect(&self, port: &str) {
        info!(target: "serial_link", "connect requested: {}", port);
        if let Ok(mut requested) = self.shared.requested.lock() {
            *requested = Some(port.to_string());
        }
        if self.shared.close_port() {
            self.shared.set_state(ConnectionState::Idle);
            self.shared.emit(LinkEvent::Disconnected);
        }
    }

    /// Close the connection and drop any pending request.
    pub fn disconnect(&self) {
        if let Ok(mut requested) = self.shared.requested.lock() {
            *requested = None;
        }
        if self.shared.close_port() {
            info!(target: "serial_link", "disconnected");
            self.shared.set_state(ConnectionState::Idle);
            self.shared.emit(LinkEvent::Disconnected);
        }
    }

    /// Fire-and-forget write. A transmit failure closes the link and emits a
    /// disconnect event instead of returning an error: the motion command it
    /// carried has already logically happened on the caller's side.
    pub fn write(&self, bytes: &[u8]) {
        let Ok(mut guard) = self.shared.port.lock() else {
            return;
        };
        let Some(port) = guard.as_mut() else {
            debug!(target: "serial_link", "write with no connection dropped");
            return;
        };
        let result = port.write_all(bytes).and_then(|_| port.flush());
        if let Err(e) = result {
            warn!(target: "serial_link", "write failed: {}", e);
            *guard = None;
            drop(guard);
            self.shared.set_state(ConnectionState::Idle);
            self.shared.emit(LinkEvent::Disconnected);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared
            .state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(ConnectionState::Idle)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected(_))
    }

    /// Stop the worker and close the port. Called from Drop as well.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.close_port();
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    debug!(target: "serial_link", "link worker started");
    while !shared.stop.load(Ordering::Relaxed) {
        if !shared.has_port() {
            // one attempt per request; the request is consumed either way
            let requested = shared
                .requested
                .lock()
                .ok()
                .and_then(|mut guard| guard.take());
            match requested {
                Some(path) => try_connect(&shared, &path),
                None => thread::sleep(IDLE_POLL),
            }
            continue;
        }

        match read_available(&shared) {
            ReadOutcome::Data(bytes) => shared.emit(LinkEvent::Data(bytes)),
            ReadOutcome::Empty => thread::sleep(READ_POLL),
            ReadOutcome::Failed(e) => {
                shared.fail_connection("read failed", &e);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!(target: "serial_link", "link worker stopped");
}

fn try_connect(shared: &Arc<Shared>, path: &str) {
    shared.set_state(ConnectionState::Connecting(path.to_string()));
    info!(target: "serial_link", "connecting to {} @ {} baud", path, shared.baud);

    match serialport::new(path, shared.baud)
        .timeout(READ_POLL)
        .open()
    {
        Ok(port) => {
            // device reset on open: wait before declaring the link usable
            thread::sleep(SETTLE_DELAY);
            if shared.stop.load(Ordering::Relaxed) {
                return;
            }
            if let Ok(mut guard) = shared.port.lock() {
                *guard = Some(port);
            }
            shared.set_state(ConnectionState::Connected(path.to_string()));
            shared.emit(LinkEvent::Connected(path.to_string()));
            info!(target: "serial_link", "connected: {}", path);
        }
        Err(e) => {
            warn!(target: "serial_link", "failed to open {}: {}", path, e);
            shared.set_state(ConnectionState::Idle);
        }
    }
}

enum ReadOutcome {
    Data(Vec<u8>),
    Empty,
    Failed(std::io::Error),
}

/// Read whatever is available without blocking the writer for long: the port
/// mutex is held only for this one read.
fn read_available(shared: &Shared) -> ReadOutcome {
    let Ok(mut guard) = shared.port.lock() else {
        return ReadOutcome::Empty;
    };
    let Some(port) = guard.as_mut() else {
        return ReadOutcome::Empty;
    };

    let waiting = match port.bytes_to_read() {
        Ok(n) => n as usize,
        Err(e) => return ReadOutcome::Failed(e.into()),
    };
    if waiting == 0 {
        return ReadOutcome::Empty;
    }

    let mut buf = vec![0u8; waiting.min(512)];
    match port.read(&mut buf) {
        Ok(0) => ReadOutcome::Empty,
        Ok(len) => {
            buf.truncate(len);
            ReadOutcome::Data(buf)
        }
        Err(e)
            if e.kind() == std::io::ErrorKind::TimedOut
                || e.kind() == std::io::ErrorKind::Interrupted =>
        {
            ReadOutcome::Empty
        }
        Err(e) => ReadOutcome::Failed(e),
    }
}
