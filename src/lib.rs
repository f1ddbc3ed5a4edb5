/// Arm Driver Library
///
/// Motion/recording/playback/reverse engine for a multi-joint robotic arm
/// driven over a character-oriented serial link.

pub mod command_channel;
pub mod commands;
pub mod config_loader;
pub mod controller;
pub mod motion;
pub mod ops_log;
pub mod playback;
pub mod recorder;
pub mod reverse_log;
pub mod serial_link;

pub use command_channel::{ChannelEvent, CommandChannel, CommandPort};
pub use config_loader::ArmSettings;
pub use controller::{ArmController, ArmEvent};
pub use motion::{Direction, MotionTracker, MotorId, ServoAngle};
pub use playback::{PlaybackOutcome, PlaybackScheduler, PlaybackState};
pub use recorder::{RecordedEvent, Recorder, RecordingState};
pub use reverse_log::{ReverseAction, ReverseLog};
pub use serial_link::{ConnectionState, LinkEvent, SerialLink};
