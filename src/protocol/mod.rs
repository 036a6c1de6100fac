//! Conveyor Controller Wire Protocol
//!
//! Protocol Overview:
//! - Format: ASCII, newline-terminated lines from the board
//! - Baud: 115200, 8N1, no flow control
//! - Host → device: single command bytes, no terminator
//!   - `Z` tare, `C` move to camera, `W` move to scale and measure, `H` move home
//! - Device → host:
//!   - Acknowledgments: `ZERO_DONE`, `AT_CAPTURE`, `AT_HOME`
//!   - Measurements: `MEASURED W=<num>g T=<num>C H=<num>%` (any subset, any number of lines)
//!   - Terminator: `WEIGH_DONE`
//!   - Anything else is free-text diagnostics
//!
//! The board resets when the port is opened and prints boot chatter for about
//! two seconds; nothing should be sent before that has been drained.

pub mod parser;

pub use parser::{classify, parse_number, LineEvent, MeasurementRecord};

/// Acknowledgment sent by the board when taring finished.
pub const ACK_TARE: &str = "ZERO_DONE";
/// Acknowledgment sent when the sample is under the camera.
pub const ACK_AT_CAPTURE: &str = "AT_CAPTURE";
/// Acknowledgment sent when the sample is back at the loading position.
pub const ACK_AT_HOME: &str = "AT_HOME";
/// Sentinel terminating a measurement burst.
pub const WEIGH_DONE: &str = "WEIGH_DONE";
/// First token of a measurement line.
pub const MEASURED_MARKER: &str = "MEASURED";

/// Command the host can send to the controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Zero the scale (tray must be empty)
    Tare,
    /// Move the sample under the camera
    MoveToCapture,
    /// Move the sample onto the scale and report measurements
    MoveToWeigh,
    /// Return to the loading position
    MoveHome,
}

impl Command {
    /// Single-byte wire token for this command.
    pub fn wire_byte(self) -> u8 {
        match self {
            Command::Tare => b'Z',
            Command::MoveToCapture => b'C',
            Command::MoveToWeigh => b'W',
            Command::MoveHome => b'H',
        }
    }

    /// Line the board prints once the command has completed.
    ///
    /// `MoveToWeigh` completes with the measurement terminator rather than an
    /// acknowledgment; its lines are consumed by the measurement collector.
    pub fn completion(self) -> &'static str {
        match self {
            Command::Tare => ACK_TARE,
            Command::MoveToCapture => ACK_AT_CAPTURE,
            Command::MoveToWeigh => WEIGH_DONE,
            Command::MoveHome => ACK_AT_HOME,
        }
    }

    /// Decode a wire byte.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            b'Z' => Some(Command::Tare),
            b'C' => Some(Command::MoveToCapture),
            b'W' => Some(Command::MoveToWeigh),
            b'H' => Some(Command::MoveHome),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Tare => "TARE",
            Command::MoveToCapture => "MOVE_TO_CAPTURE",
            Command::MoveToWeigh => "MOVE_TO_WEIGH",
            Command::MoveHome => "MOVE_HOME",
        };
        write!(f, "{} ('{}')", name, self.wire_byte() as char)
    }
}

/// Station the conveyor can be sent to with an acknowledged move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionTarget {
    /// Camera station
    Capture,
    /// Loading position
    Home,
}

impl MotionTarget {
    /// Command that moves the conveyor to this target.
    pub fn command(self) -> Command {
        match self {
            MotionTarget::Capture => Command::MoveToCapture,
            MotionTarget::Home => Command::MoveHome,
        }
    }

    /// Acknowledgment expected once the target is reached.
    pub fn acknowledgment(self) -> &'static str {
        self.command().completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_round_trip() {
        for cmd in [
            Command::Tare,
            Command::MoveToCapture,
            Command::MoveToWeigh,
            Command::MoveHome,
        ] {
            assert_eq!(Command::from_wire(cmd.wire_byte()), Some(cmd));
        }
        assert_eq!(Command::from_wire(b'x'), None);
    }

    #[test]
    fn each_command_has_its_own_completion() {
        assert_eq!(Command::Tare.completion(), "ZERO_DONE");
        assert_eq!(Command::MoveToCapture.completion(), "AT_CAPTURE");
        assert_eq!(Command::MoveHome.completion(), "AT_HOME");
        assert_eq!(Command::MoveToWeigh.completion(), "WEIGH_DONE");
    }

    #[test]
    fn motion_targets_map_to_commands() {
        assert_eq!(MotionTarget::Capture.command().wire_byte(), b'C');
        assert_eq!(MotionTarget::Home.command().wire_byte(), b'H');
        assert_eq!(MotionTarget::Home.acknowledgment(), ACK_AT_HOME);
    }
}
