//! Command protocol result codes and line parsing.
//!
//! The wire format is newline-terminated UTF-8 lines, each either a
//! bare command (`key`) or an assignment (`key=value`). Responses are
//! the same shape, terminated by a trailing result line.

use std::fmt;

/// Outcome of dispatching one command line.
///
/// Every code has a fixed wire string except `Silence` (the handler
/// already streamed its own response, nothing more is sent) and
/// `Disconnected` (never put on the wire; it tells the dispatcher to
/// drop the connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Busy,
    Fail,
    BadValue,
    BadKey,
    Silence,
    Disconnected,
}

impl ResultCode {
    /// Fixed wire string, or `None` for codes that are never sent.
    pub fn wire_str(self) -> Option<&'static str> {
        match self {
            Self::Ok => Some("OK"),
            Self::Busy => Some("BUSY"),
            Self::Fail => Some("FAIL"),
            Self::BadValue => Some("BADVAL"),
            Self::BadKey => Some("BADKEY"),
            Self::Silence | Self::Disconnected => None,
        }
    }

    /// Parse a trailing result line received from a server.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::Ok),
            "BUSY" => Some(Self::Busy),
            "FAIL" => Some(Self::Fail),
            "BADVAL" => Some(Self::BadValue),
            "BADKEY" => Some(Self::BadKey),
            _ => None,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wire_str() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "{:?}", self),
        }
    }
}

/// Split one received line into `(key, value)`.
///
/// Splits on the first `=` and trims surrounding whitespace from both
/// halves; a line without `=` is a bare getter.
pub fn split_command(line: &str) -> (&str, Option<&str>) {
    match line.split_once('=') {
        Some((key, value)) => (key.trim(), Some(value.trim())),
        None => (line.trim(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_are_fixed() {
        assert_eq!(ResultCode::Ok.wire_str(), Some("OK"));
        assert_eq!(ResultCode::Busy.wire_str(), Some("BUSY"));
        assert_eq!(ResultCode::Fail.wire_str(), Some("FAIL"));
        assert_eq!(ResultCode::BadValue.wire_str(), Some("BADVAL"));
        assert_eq!(ResultCode::BadKey.wire_str(), Some("BADKEY"));
        assert_eq!(ResultCode::Silence.wire_str(), None);
        assert_eq!(ResultCode::Disconnected.wire_str(), None);
    }

    #[test]
    fn split_on_first_equals_only() {
        assert_eq!(split_command("exptime"), ("exptime", None));
        assert_eq!(split_command("exptime=2.5"), ("exptime", Some("2.5")));
        assert_eq!(split_command(" object = M 31 "), ("object", Some("M 31")));
        assert_eq!(
            split_command("plugincmd=mode=fast"),
            ("plugincmd", Some("mode=fast"))
        );
    }
}
