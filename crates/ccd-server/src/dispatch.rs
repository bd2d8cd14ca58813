//! Command dispatch table.
//!
//! One entry per protocol key: `{key, guard, handler}`. Lookup is a
//! linear scan over a fixed list; this is not a hot path. Guarded
//! entries run with the device lock held (bounded acquisition, BUSY on
//! timeout); the guard then checks device presence and, for setter
//! invocations, that no capture is in flight. The lock is released
//! before the trailing result line is written.

use crate::context::{Daemon, Shared};
use crate::handlers;
use ccd_core::protocol::{split_command, ResultCode};
use futures::future::BoxFuture;
use std::sync::OnceLock;

/// Which device family a guard requires to be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Camera,
    Focuser,
    Wheel,
}

/// When the guard enforces the capture-in-flight exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyCheck {
    /// Setter invocations are refused unless the state machine is
    /// Idle. Getter invocations always pass.
    WhenSetting,
    /// Never refused; used by the capture-control and status keys that
    /// must work mid-exposure.
    Never,
}

/// Pre-handler admission check for one command table entry.
#[derive(Debug, Clone, Copy)]
pub struct Guard {
    pub device: Option<DeviceKind>,
    pub busy: BusyCheck,
}

impl Guard {
    pub const CAMERA: Guard = Guard {
        device: Some(DeviceKind::Camera),
        busy: BusyCheck::WhenSetting,
    };
    pub const CAMERA_ALWAYS: Guard = Guard {
        device: Some(DeviceKind::Camera),
        busy: BusyCheck::Never,
    };
    pub const FOCUSER: Guard = Guard {
        device: Some(DeviceKind::Focuser),
        busy: BusyCheck::WhenSetting,
    };
    pub const WHEEL: Guard = Guard {
        device: Some(DeviceKind::Wheel),
        busy: BusyCheck::WhenSetting,
    };
    pub const SESSION: Guard = Guard {
        device: None,
        busy: BusyCheck::WhenSetting,
    };
    pub const SESSION_ALWAYS: Guard = Guard {
        device: None,
        busy: BusyCheck::Never,
    };

    /// Returns the refusal code, or `None` to admit the handler.
    fn deny(&self, daemon: &Daemon, shared: &Shared, setting: bool) -> Option<ResultCode> {
        let present = match self.device {
            None => true,
            Some(DeviceKind::Camera) => daemon.devices.camera.is_some(),
            Some(DeviceKind::Focuser) => daemon.devices.focuser.is_some(),
            Some(DeviceKind::Wheel) => daemon.devices.wheel.is_some(),
        };
        if !present {
            return Some(ResultCode::Fail);
        }
        if setting && self.busy == BusyCheck::WhenSetting && !shared.state.is_idle() {
            return Some(ResultCode::Busy);
        }
        None
    }
}

type PlainFn =
    for<'a> fn(&'a Daemon, &'a str, Option<&'a str>, &'a mut Vec<String>) -> BoxFuture<'a, ResultCode>;
type LockedFn = for<'a> fn(
    &'a Daemon,
    &'a mut Shared,
    &'a str,
    Option<&'a str>,
    &'a mut Vec<String>,
) -> BoxFuture<'a, ResultCode>;

pub enum HandlerFn {
    /// Runs without the device lock. Status/introspection keys only.
    Plain(PlainFn),
    /// Runs with the device lock held and the guard satisfied.
    Locked(LockedFn),
}

pub struct CommandEntry {
    pub key: &'static str,
    pub guard: Option<Guard>,
    pub handler: HandlerFn,
    pub help: &'static str,
}

macro_rules! plain {
    ($key:literal, $help:literal, $f:path) => {
        CommandEntry {
            key: $key,
            guard: None,
            handler: HandlerFn::Plain(|d, k, v, out| Box::pin($f(d, k, v, out))),
            help: $help,
        }
    };
}

macro_rules! locked {
    ($key:literal, $help:literal, $guard:expr, $f:path) => {
        CommandEntry {
            key: $key,
            guard: Some($guard),
            handler: HandlerFn::Locked(|d, s, k, v, out| Box::pin($f(d, s, k, v, out))),
            help: $help,
        }
    };
}

/// The fixed command table.
pub fn table() -> &'static [CommandEntry] {
    static TABLE: OnceLock<Vec<CommandEntry>> = OnceLock::new();
    TABLE.get_or_init(build_table).as_slice()
}

fn build_table() -> Vec<CommandEntry> {
    vec![
        plain!("info", "daemon and driver identity", handlers::info),
        plain!("help", "list available commands", handlers::help),
        plain!("shmemkey", "shared image segment path", handlers::shmemkey),
        locked!("camlist", "enumerate cameras", Guard::CAMERA, handlers::camlist),
        locked!("camdevno", "select camera unit", Guard::CAMERA, handlers::camdevno),
        locked!("exptime", "exposure time in seconds", Guard::CAMERA, handlers::exptime),
        locked!("hbin", "horizontal binning factor", Guard::CAMERA, handlers::hbin),
        locked!("vbin", "vertical binning factor", Guard::CAMERA, handlers::vbin),
        locked!("format", "sub-frame corners x0,y0,x1,y1", Guard::CAMERA, handlers::format),
        locked!("maxformat", "full array corners", Guard::CAMERA, handlers::maxformat),
        locked!("tcold", "sensor temperature", Guard::CAMERA, handlers::tcold),
        locked!(
            "expstate",
            "capture state; =1 starts, =0 cancels",
            Guard::CAMERA_ALWAYS,
            handlers::expstate
        ),
        locked!("tremain", "seconds left in exposure", Guard::CAMERA_ALWAYS, handlers::tremain),
        locked!("8bit", "8-bit readout on/off", Guard::CAMERA, handlers::eight_bit),
        locked!("fastspeed", "fast readout on/off", Guard::CAMERA, handlers::fastspeed),
        locked!("dark", "dark frame on/off", Guard::CAMERA, handlers::dark),
        locked!("gain", "analog gain", Guard::CAMERA, handlers::gain),
        locked!("brightness", "brightness / offset", Guard::CAMERA, handlers::brightness),
        locked!("shutter", "shutter mode", Guard::CAMERA, handlers::shutter),
        locked!("confio", "I/O port direction mask", Guard::CAMERA, handlers::confio),
        locked!("io", "I/O port value", Guard::CAMERA, handlers::io),
        locked!("nflushes", "pre-exposure clears", Guard::CAMERA, handlers::nflushes),
        locked!("fan", "fan speed", Guard::CAMERA, handlers::fan),
        locked!("plugincmd", "driver-specific command", Guard::CAMERA, handlers::plugincmd),
        locked!("infty", "free-running capture on/off", Guard::SESSION, handlers::infty),
        locked!("filename", "output file name", Guard::SESSION, handlers::filename),
        locked!(
            "filenameprefix",
            "prefix for numbered output files",
            Guard::SESSION,
            handlers::filenameprefix
        ),
        locked!("rewrite", "overwrite existing files on/off", Guard::SESSION, handlers::rewrite),
        locked!(
            "lastfilename",
            "last written frame path",
            Guard::SESSION_ALWAYS,
            handlers::lastfilename
        ),
        locked!("getheaders", "dump metadata key/values", Guard::SESSION_ALWAYS, handlers::getheaders),
        locked!("author", "FITS metadata", Guard::SESSION, handlers::metadata),
        locked!("instrument", "FITS metadata", Guard::SESSION, handlers::metadata),
        locked!("observer", "FITS metadata", Guard::SESSION, handlers::metadata),
        locked!("object", "FITS metadata", Guard::SESSION, handlers::metadata),
        locked!("program", "FITS metadata", Guard::SESSION, handlers::metadata),
        locked!("objtype", "FITS metadata", Guard::SESSION, handlers::metadata),
        locked!(
            "headerfiles",
            "extra header files, comma separated",
            Guard::SESSION,
            handlers::headerfiles
        ),
        locked!("foclist", "enumerate focusers", Guard::FOCUSER, handlers::foclist),
        locked!("focdevno", "select focuser unit", Guard::FOCUSER, handlers::focdevno),
        locked!("focpos", "focuser position; =home to home", Guard::FOCUSER, handlers::focpos),
        locked!("wlist", "enumerate filter wheels", Guard::WHEEL, handlers::wlist),
        locked!("wdevno", "select wheel unit", Guard::WHEEL, handlers::wdevno),
        locked!("wpos", "filter wheel slot", Guard::WHEEL, handlers::wpos),
        locked!(
            "restartTheServer",
            "terminate the daemon process",
            Guard::SESSION_ALWAYS,
            handlers::restart_the_server
        ),
    ]
}

fn lookup(key: &str) -> Option<&'static CommandEntry> {
    table().iter().find(|entry| entry.key == key)
}

/// Dispatch one received line.
///
/// Response lines (if any) are appended to `out`; the returned code's
/// wire string, when it has one, is the trailing result line.
pub async fn dispatch_line(daemon: &Daemon, line: &str, out: &mut Vec<String>) -> ResultCode {
    let line = line.trim();
    if line.is_empty() {
        return ResultCode::Silence;
    }
    let (key, value) = split_command(line);
    let Some(entry) = lookup(key) else {
        tracing::debug!(key, "unknown command");
        return ResultCode::BadKey;
    };
    match &entry.handler {
        HandlerFn::Plain(f) => f(daemon, key, value, out).await,
        HandlerFn::Locked(f) => {
            let Some(mut shared) = daemon.lock_bounded().await else {
                return ResultCode::Busy;
            };
            if let Some(guard) = &entry.guard {
                if let Some(code) = guard.deny(daemon, &shared, value.is_some()) {
                    return code;
                }
            }
            f(daemon, &mut shared, key, value, out).await
            // Guard drops here, before the caller writes the result.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_is_unique() {
        let table = table();
        for (i, entry) in table.iter().enumerate() {
            assert!(
                table[i + 1..].iter().all(|other| other.key != entry.key),
                "duplicate key {}",
                entry.key
            );
        }
    }

    #[test]
    fn lookup_is_exact() {
        assert!(lookup("exptime").is_some());
        assert!(lookup("restartTheServer").is_some());
        assert!(lookup("EXPTIME").is_none());
        assert!(lookup("foobar").is_none());
    }

    #[test]
    fn locked_entries_carry_guards() {
        for entry in table() {
            match entry.handler {
                HandlerFn::Plain(_) => assert!(entry.guard.is_none(), "{}", entry.key),
                HandlerFn::Locked(_) => assert!(entry.guard.is_some(), "{}", entry.key),
            }
        }
    }
}
