/// Semantic command layer over the serial link.
///
/// Outbound: single ASCII characters, fire-and-forget, no acknowledgement or
/// request/response correlation at this layer. Inbound: raw byte chunks are
/// lossy-decoded and assembled into text lines for listeners; malformed byte
/// sequences degrade to replacement characters, never to errors.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};

use crate::serial_link::{LinkEvent, SerialLink};

/// Cap on the line-assembly buffer; a device stuck without newlines gets its
/// output flushed in chunks of this size.
const MAX_PENDING_LINE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected(String),
    Disconnected,
    /// One decoded line of device output, newline stripped.
    Text(String),
}

/// The seam between the engine and the wire. The controller, homing worker
/// and playback all send through this trait so tests can substitute a mock.
pub trait CommandPort: Send + Sync {
    fn send_command(&self, command: char);
}

pub struct CommandChannel {
    link: Arc<SerialLink>,
}

impl CommandChannel {
    /// Wrap a link. A small forwarder thread decodes link events into channel
    /// events on the returned receiver; it exits when the link shuts down.
    pub fn new(link: Arc<SerialLink>, link_rx: Receiver<LinkEvent>) -> (Self, Receiver<ChannelEvent>) {
        let (event_tx, event_rx) = unbounded();
        let spawned = thread::Builder::new()
            .name("command-decode".to_string())
            .spawn(move || forward_loop(link_rx, event_tx));
        if spawned.is_err() {
            warn!(target: "command_channel", "failed to spawn decode thread");
        }
        (Self { link }, event_rx)
    }
}

impl CommandPort for CommandChannel {
    fn send_command(&self, command: char) {
        let mut buf = [0u8; 4];
        self.link.write(command.encode_utf8(&mut buf).as_bytes());
    }
}

fn forward_loop(link_rx: Receiver<LinkEvent>, event_tx: Sender<ChannelEvent>) {
    let mut pending = String::new();
    for event in link_rx.iter() {
        let forwarded = match event {
            LinkEvent::Connected(port) => ChannelEvent::Connected(port),
            LinkEvent::Disconnected => {
                // whatever is buffered will never get its newline
                flush_pending(&mut pending, &event_tx);
                ChannelEvent::Disconnected
            }
            LinkEvent::Data(bytes) => {
                pending.push_str(&String::from_utf8_lossy(&bytes));
                drain_lines(&mut pending, &event_tx);
                continue;
            }
        };
        if event_tx.send(forwarded).is_err() {
            break;
        }
    }
    debug!(target: "command_channel", "decode thread stopped");
}

/// Emit every complete line in the buffer, keeping the unterminated tail.
fn drain_lines(pending: &mut String, event_tx: &Sender<ChannelEvent>) {
    while let Some(newline) = pending.find('\n') {
        let mut line: String = pending.drain(..=newline).collect();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        let _ = event_tx.send(ChannelEvent::Text(line));
    }
    if pending.len() > MAX_PENDING_LINE {
        flush_pending(pending, event_tx);
    }
}

fn flush_pending(pending: &mut String, event_tx: &Sender<ChannelEvent>) {
    if !pending.is_empty() {
        let _ = event_tx.send(ChannelEvent::Text(std::mem::take(pending)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_texts(rx: &Receiver<ChannelEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ChannelEvent::Text(text) = event {
                out.push(text);
            }
        }
        out
    }

    /// Drive the decode loop directly with synthetic link events.
    fn run_decode(events: Vec<LinkEvent>) -> Receiver<ChannelEvent> {
        let (link_tx, link_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        for event in events {
            link_tx.send(event).unwrap();
        }
        drop(link_tx);
        forward_loop(link_rx, event_tx);
        event_rx
    }

    #[test]
    fn test_lines_assembled_across_chunks() {
        let rx = run_decode(vec![
            LinkEvent::Data(b"[rec] ka".to_vec()),
            LinkEvent::Data(b"yit basladi\nsecond ".to_vec()),
            LinkEvent::Data(b"line\r\n".to_vec()),
        ]);
        assert_eq!(
            collect_texts(&rx),
            vec!["[rec] kayit basladi".to_string(), "second line".to_string()]
        );
    }

    #[test]
    fn test_invalid_bytes_decode_lossily() {
        let rx = run_decode(vec![LinkEvent::Data(b"ok \xff\xfe end\n".to_vec())]);
        let texts = collect_texts(&rx);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("ok "));
        assert!(texts[0].ends_with(" end"));
    }

    #[test]
    fn test_disconnect_flushes_partial_line() {
        let (link_tx, link_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        link_tx.send(LinkEvent::Data(b"tail without newline".to_vec())).unwrap();
        link_tx.send(LinkEvent::Disconnected).unwrap();
        drop(link_tx);
        forward_loop(link_rx, event_tx);

        let events: Vec<ChannelEvent> = event_rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ChannelEvent::Text("tail without newline".to_string()),
                ChannelEvent::Disconnected,
            ]
        );
    }

    #[test]
    fn test_connected_event_forwards_port_name() {
        let rx = run_decode(vec![LinkEvent::Connected("/dev/ttyUSB0".to_string())]);
        let events: Vec<ChannelEvent> = rx.try_iter().collect();
        assert_eq!(events, vec![ChannelEvent::Connected("/dev/ttyUSB0".to_string())]);
    }
}
