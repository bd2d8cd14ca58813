//! Capture state machine state and request flags.
//!
//! One instance of each exists per daemon. The flags are set by command
//! handlers (and, for infinite-capture mode, by the driver loop itself)
//! but only ever cleared by the driver loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the single outstanding exposure.
///
/// Success path: `Idle -> Capturing -> FrameReady -> Idle`.
/// Failure path: `Idle/Capturing -> Error -> Idle`.
///
/// `FrameReady` and `Error` are terminal for the driver loop: only the
/// protocol server resets them to `Idle`, after broadcasting the
/// transition to every connected client, so no frame completion can be
/// overwritten before a client has been told about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    Idle,
    Capturing,
    FrameReady,
    Error,
}

impl CaptureState {
    /// Protocol digit for the `expstate` command.
    pub fn as_wire(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Capturing => 1,
            Self::FrameReady => 2,
            Self::Error => 3,
        }
    }

    /// Decode a protocol digit.
    pub fn from_wire(digit: u8) -> Option<Self> {
        match digit {
            0 => Some(Self::Idle),
            1 => Some(Self::Capturing),
            2 => Some(Self::FrameReady),
            3 => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether the state machine will accept a new exposure request.
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }

    /// Whether this is one of the terminal states the server must
    /// broadcast and clear.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FrameReady | Self::Error)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::FrameReady => "frame_ready",
            Self::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// Requests other execution contexts make of the driver loop.
///
/// Set anywhere (under the device lock), cleared only by the driver
/// loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFlags {
    /// Begin an exposure at the next `Idle` iteration.
    pub start: bool,
    /// Abort any in-flight exposure and force `Idle`.
    pub cancel: bool,
    /// Terminate the process. Operator-requested restart is
    /// fatal-by-design, not a recoverable condition.
    pub restart: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_digits_round_trip() {
        for s in [
            CaptureState::Idle,
            CaptureState::Capturing,
            CaptureState::FrameReady,
            CaptureState::Error,
        ] {
            assert_eq!(CaptureState::from_wire(s.as_wire()), Some(s));
        }
        assert_eq!(CaptureState::from_wire(4), None);
    }

    #[test]
    fn terminal_states() {
        assert!(CaptureState::FrameReady.is_terminal());
        assert!(CaptureState::Error.is_terminal());
        assert!(!CaptureState::Idle.is_terminal());
        assert!(!CaptureState::Capturing.is_terminal());
    }
}
