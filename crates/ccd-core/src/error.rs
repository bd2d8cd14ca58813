//! Error types shared by drivers and the daemon.
//!
//! [`DriverError`] is the single error type a device plugin can return.
//! The `Unsupported` variant is how a plugin signals "this operation is
//! not implemented for this hardware"; callers must treat it exactly
//! like any other failure unless they have a documented fallback.

use thiserror::Error;

/// Convenience alias for driver call results.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Error returned by device capability calls.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The plugin does not implement this operation.
    ///
    /// Capability trait methods default to this; a plugin that leaves a
    /// setter unimplemented behaves identically to one whose setter
    /// failed.
    #[error("operation '{0}' not supported by this driver")]
    Unsupported(&'static str),

    /// No device is selected or the selected device vanished.
    #[error("no device connected")]
    NotConnected,

    /// Hardware probe found no devices of this family.
    #[error("no devices found")]
    NoDevice,

    /// A requested value is outside device-reported limits.
    ///
    /// Setters return this instead of silently clamping; only geometry
    /// setters may adjust a request and report the adjusted value back.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The underlying hardware call failed.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// A driver-internal timeout expired.
    #[error("driver timeout: {0}")]
    Timeout(String),
}

impl DriverError {
    /// Build a `Hardware` error from anything displayable.
    pub fn hardware(msg: impl std::fmt::Display) -> Self {
        Self::Hardware(msg.to_string())
    }

    /// Build an `InvalidValue` error from anything displayable.
    pub fn invalid(msg: impl std::fmt::Display) -> Self {
        Self::InvalidValue(msg.to_string())
    }
}

/// Errors raised by the daemon itself, outside any driver call.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Configuration parsed but is semantically wrong.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Shared image segment could not be created or mapped.
    ///
    /// Fatal at startup: without the segment there is nowhere to put
    /// pixels.
    #[error("shared image segment error: {0}")]
    Shmem(String),

    /// Socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A driver call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_display_names_operation() {
        let err = DriverError::Unsupported("set_gain");
        assert_eq!(
            err.to_string(),
            "operation 'set_gain' not supported by this driver"
        );
    }

    #[test]
    fn daemon_error_wraps_driver_error() {
        let err: DaemonError = DriverError::NotConnected.into();
        assert_eq!(err.to_string(), "no device connected");
    }
}
