/// Console front-end for the robot arm.
///
/// Thin wiring only: stdin lines go in as commands, controller events and
/// device output come back out on stdout. All engine logic lives in the
/// library.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{unbounded, RecvTimeoutError};

use armdriver::command_channel::CommandChannel;
use armdriver::config_loader::{load_settings, ArmSettings};
use armdriver::controller::{ArmController, ArmEvent};
use armdriver::motion::{Direction, MotorId};
use armdriver::serial_link::SerialLink;

const HELP_TEXT: &str = "\
Commands (single characters, firmware-compatible):
  1-6  select motor (1-5 steppers, 6 servo)
  d    forward (stepper) / +60 deg (servo)
  a    backward (stepper) / -60 deg (servo)
  w    stop (stepper) / hold (servo)
  [    +15 deg (servo)
  ]    -15 deg (servo)
  c    servo to 0 deg
  R/T  firmware record start/stop
  P/S  firmware play start/stop
  L    firmware loop toggle
  V    firmware info

Console words:
  connect <port> / disconnect
  sel <ids...> / all / none     motor selection set
  rec / stoprec                 local recorder arm/disarm
  play / playloop / stopplay    local playback
  home                          undo all recorded motion
  reset                         clear undo bookkeeping and operations file
  z <microseconds>              stepper delay (150-4000)
  h                             this help
  q                             quit";

#[derive(Parser)]
#[command(author, version, about = "Console control for the robot arm", long_about = None)]
struct Args {
    /// Serial port path, e.g. /dev/ttyUSB0 (overrides configuration)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate (overrides configuration)
    #[arg(long)]
    baud: Option<u32>,

    /// Hostname-keyed YAML settings file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings(path)?,
        None => ArmSettings::default(),
    };
    if let Some(port) = args.port {
        settings.port = Some(port);
    }
    if let Some(baud) = args.baud {
        settings.baud = baud;
    }

    let (link, link_rx) = SerialLink::start(settings.baud);
    let link = Arc::new(link);
    let (channel, channel_rx) = CommandChannel::new(Arc::clone(&link), link_rx);
    let mut controller = ArmController::new(Arc::new(channel), channel_rx, &settings);
    controller.attach_link(Arc::clone(&link));

    match settings.port.clone() {
        Some(port) => controller.request_connect(&port),
        None => println!("no port configured; use `connect <port>`"),
    }

    let exit = Arc::new(AtomicBool::new(false));
    {
        let exit = Arc::clone(&exit);
        ctrlc::set_handler(move || exit.store(true, Ordering::Relaxed))?;
    }

    // stdin on its own thread so the event pump never blocks on the operator
    let (line_tx, line_rx) = unbounded::<String>();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("{}", HELP_TEXT);
    while !exit.load(Ordering::Relaxed) {
        for event in controller.poll() {
            match event {
                ArmEvent::LinkUp(port) => {
                    println!("[info] connected: {}", port);
                    controller.set_step_delay_us(settings.step_delay_us);
                }
                ArmEvent::LinkDown => println!("[warn] connection lost; `connect <port>` to retry"),
                ArmEvent::DeviceText(text) => println!("{}", text),
                ArmEvent::RemoteRecording(on) => println!("[info] firmware recording: {}", on),
                ArmEvent::RemotePlayback(on) => println!("[info] firmware playback: {}", on),
                ArmEvent::RemoteLoop(on) => println!("[info] firmware loop: {}", on),
                ArmEvent::PlaybackFinished => println!("[info] playback finished"),
                ArmEvent::PlaybackStopped => println!("[info] playback stopped"),
                ArmEvent::EmptyPlayback => println!("[info] nothing recorded to play"),
                ArmEvent::NoMotorSelected => println!("[info] no motor selected"),
                ArmEvent::HomingStarted => println!("[info] homing started"),
                ArmEvent::HomingFinished => println!("[info] homing finished"),
                ArmEvent::HomingStopped => println!("[info] homing stopped"),
            }
        }

        match line_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(line) => handle_line(&mut controller, &line, &exit),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    controller.shutdown();
    link.shutdown();
    Ok(())
}

fn handle_line(controller: &mut ArmController, line: &str, exit: &AtomicBool) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let mut parts = line.split_whitespace();
    let word = parts.next().unwrap_or("");
    match word {
        "q" | "quit" => exit.store(true, Ordering::Relaxed),
        "h" | "help" => println!("{}", HELP_TEXT),
        "connect" => match parts.next() {
            Some(port) => controller.request_connect(port),
            None => println!("usage: connect <port>"),
        },
        "disconnect" => controller.disconnect(),
        "sel" => {
            controller.clear_selection();
            for id in parts.filter_map(|p| p.parse::<u8>().ok()) {
                match MotorId::new(id) {
                    Some(motor) => controller.set_motor_selected(motor, true),
                    None => println!("invalid motor id: {}", id),
                }
            }
        }
        "all" => controller.select_all(),
        "none" => controller.clear_selection(),
        "rec" => controller.arm_recorder(),
        "stoprec" => controller.disarm_recorder(),
        "play" => controller.start_playback(false),
        "playloop" => controller.start_playback(true),
        "stopplay" => controller.stop_playback(),
        "home" => controller.return_to_home(),
        "reset" => controller.reset(),
        "z" => match parts.next().and_then(|v| v.parse::<u16>().ok()) {
            Some(delay_us) => controller.set_step_delay_us(delay_us),
            None => println!("usage: z <microseconds>"),
        },
        _ => {
            for ch in line.chars().filter(|c| !c.is_whitespace()) {
                dispatch_char(controller, ch);
            }
        }
    }
}

fn dispatch_char(controller: &mut ArmController, ch: char) {
    match ch {
        '1'..='6' => {
            if let Some(motor) = MotorId::new(ch as u8 - b'0') {
                controller.select_only(motor);
            }
        }
        'd' => controller.move_selected(Direction::Forward),
        'a' => controller.move_selected(Direction::Backward),
        'w' => controller.stop_selected(),
        '[' => controller.servo_step_up(),
        ']' => controller.servo_step_down(),
        'c' => controller.servo_zero(),
        'R' => controller.remote_record_start(),
        'T' => controller.remote_record_stop(),
        'P' => controller.remote_play_start(),
        'S' => controller.remote_play_stop(),
        'L' => controller.remote_loop_toggle(),
        'V' => controller.request_info(),
        _ => println!("unknown command '{}' ('h' for help)", ch),
    }
}
