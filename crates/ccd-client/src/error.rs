//! Client-side errors.

use ccd_core::protocol::ResultCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed the connection.
    #[error("server disconnected")]
    Disconnected,

    /// The server went silent past the watchdog interval.
    #[error("server silent for longer than the watchdog interval")]
    Watchdog,

    /// The command was refused after exhausting BUSY retries.
    #[error("command '{0}' still busy after retries")]
    StillBusy(String),

    /// A non-OK result for a command that required OK.
    #[error("command '{command}' failed: {code}")]
    Refused { command: String, code: ResultCode },

    /// The capture ended in the Error state.
    #[error("capture failed on the server side")]
    CaptureFailed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
