//! Command handlers.
//!
//! Every setter-shaped handler follows set-then-report: after a set is
//! accepted, the response echoes the value the device actually holds,
//! which may differ from the request when hardware adjusted it. A bare
//! key is a valid getter for every one of them. Driver failures map to
//! FAIL except `InvalidValue`, which is the client's fault and maps to
//! BADVAL.

use crate::context::{refresh_frame_dims, Daemon, Shared};
use ccd_core::capability::FrameKind;
use ccd_core::error::DriverError;
use ccd_core::geometry::FrameFormat;
use ccd_core::image::BitDepth;
use ccd_core::protocol::ResultCode;
use ccd_core::state::CaptureState;

fn code(err: &DriverError) -> ResultCode {
    match err {
        DriverError::InvalidValue(_) => ResultCode::BadValue,
        _ => ResultCode::Fail,
    }
}

/// Evaluate a driver call, logging and bailing with the mapped result
/// code on failure.
macro_rules! drv {
    ($call:expr) => {
        match $call {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "driver call refused");
                return code(&err);
            }
        }
    };
}

macro_rules! camera {
    ($daemon:expr) => {
        match $daemon.devices.camera.as_deref() {
            Some(camera) => camera,
            None => return ResultCode::Fail,
        }
    };
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

// --- status ----------------------------------------------------------------

pub async fn info(
    daemon: &Daemon,
    _key: &str,
    _value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    out.push("server=ccdserv".to_string());
    out.push(format!("version={}", env!("CARGO_PKG_VERSION")));
    out.push(format!("plugin={}", daemon.settings.plugin));
    out.push(format!("clients={}", daemon.client_count()));
    ResultCode::Ok
}

pub async fn help(
    _daemon: &Daemon,
    _key: &str,
    _value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    for entry in crate::dispatch::table() {
        out.push(format!("{} - {}", entry.key, entry.help));
    }
    ResultCode::Ok
}

pub async fn shmemkey(
    daemon: &Daemon,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    if value.is_some() {
        return ResultCode::BadValue;
    }
    out.push(format!(
        "{key}={}",
        daemon.settings.segment_path().display()
    ));
    ResultCode::Ok
}

// --- camera ----------------------------------------------------------------

pub async fn camlist(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if value.is_some() {
        return ResultCode::BadValue;
    }
    let count = drv!(camera.probe().await);
    for index in 0..count {
        let name = drv!(camera.device_name(index).await);
        out.push(format!("{key}={index}:{name}"));
    }
    ResultCode::Ok
}

pub async fn camdevno(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(devno) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.select(devno).await);
        shared.session.cam_devno = devno;
        refresh_frame_dims(camera, shared);
    }
    out.push(format!("{key}={}", shared.session.cam_devno));
    ResultCode::Ok
}

pub async fn exptime(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(seconds) = value.parse::<f64>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_exposure(seconds).await);
    }
    out.push(format!("{key}={}", drv!(camera.exposure())));
    ResultCode::Ok
}

pub async fn hbin(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    binning(daemon, shared, key, value, out, true).await
}

pub async fn vbin(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    binning(daemon, shared, key, value, out, false).await
}

async fn binning(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
    horizontal: bool,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(factor) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        if factor == 0 {
            return ResultCode::BadValue;
        }
        let (hbin, vbin) = drv!(camera.binning());
        let request = if horizontal {
            (factor, vbin)
        } else {
            (hbin, factor)
        };
        drv!(camera.set_binning(request.0, request.1).await);
        refresh_frame_dims(camera, shared);
    }
    let (hbin, vbin) = drv!(camera.binning());
    out.push(format!("{key}={}", if horizontal { hbin } else { vbin }));
    ResultCode::Ok
}

pub async fn format(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Some(requested) = FrameFormat::parse_corners(value) else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_geometry(requested).await);
        refresh_frame_dims(camera, shared);
    }
    // Report what the device holds, adjusted or not.
    out.push(format!("{key}={}", drv!(camera.geometry())));
    ResultCode::Ok
}

pub async fn maxformat(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if value.is_some() {
        return ResultCode::BadValue;
    }
    out.push(format!("{key}={}", drv!(camera.array_format())));
    ResultCode::Ok
}

pub async fn tcold(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if value.is_some() {
        return ResultCode::BadValue;
    }
    out.push(format!("{key}={:.2}", drv!(camera.temperature().await)));
    ResultCode::Ok
}

pub async fn expstate(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    match value {
        None => {
            out.push(format!("{key}={}", shared.state.as_wire()));
            ResultCode::Ok
        }
        // Exactly two values are accepted: 1 starts, 0 cancels.
        Some("1") => {
            if !shared.state.is_idle() {
                return ResultCode::Busy;
            }
            shared.flags.start = true;
            daemon.wake_capture();
            ResultCode::Ok
        }
        Some("0") => {
            shared.flags.cancel = true;
            daemon.wake_capture();
            ResultCode::Ok
        }
        Some(_) => ResultCode::BadValue,
    }
}

pub async fn tremain(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if value.is_some() {
        return ResultCode::BadValue;
    }
    let remaining = if shared.state == CaptureState::Capturing {
        shared.seconds_remaining.max(0.0)
    } else {
        0.0
    };
    out.push(format!("{key}={remaining:.1}"));
    ResultCode::Ok
}

pub async fn eight_bit(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Some(on) = parse_switch(value) else {
            return ResultCode::BadValue;
        };
        let depth = if on { BitDepth::Bits8 } else { BitDepth::Bits16 };
        drv!(camera.set_bit_depth(depth).await);
        refresh_frame_dims(camera, shared);
    }
    let depth = drv!(camera.bit_depth());
    out.push(format!("{key}={}", u8::from(depth == BitDepth::Bits8)));
    ResultCode::Ok
}

pub async fn fastspeed(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Some(fast) = parse_switch(value) else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_fast_readout(fast).await);
    }
    out.push(format!("{key}={}", u8::from(drv!(camera.fast_readout()))));
    ResultCode::Ok
}

pub async fn dark(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Some(dark) = parse_switch(value) else {
            return ResultCode::BadValue;
        };
        let kind = if dark { FrameKind::Dark } else { FrameKind::Light };
        drv!(camera.set_frame_kind(kind).await);
    }
    let kind = drv!(camera.frame_kind());
    out.push(format!("{key}={}", u8::from(kind == FrameKind::Dark)));
    ResultCode::Ok
}

pub async fn gain(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(gain) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_gain(gain).await);
    }
    out.push(format!("{key}={}", drv!(camera.gain())));
    ResultCode::Ok
}

pub async fn brightness(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(brightness) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_brightness(brightness).await);
    }
    out.push(format!("{key}={}", drv!(camera.brightness())));
    ResultCode::Ok
}

pub async fn shutter(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(mode) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_shutter_mode(mode).await);
    }
    out.push(format!("{key}={}", drv!(camera.shutter_mode())));
    ResultCode::Ok
}

pub async fn confio(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(mask) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_io_config(mask).await);
    }
    out.push(format!("{key}={}", drv!(camera.io_config())));
    ResultCode::Ok
}

pub async fn io(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(bits) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_io(bits).await);
    }
    out.push(format!("{key}={}", drv!(camera.io())));
    ResultCode::Ok
}

pub async fn nflushes(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(count) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_flushes(count).await);
    }
    out.push(format!("{key}={}", drv!(camera.flushes())));
    ResultCode::Ok
}

pub async fn fan(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    if let Some(value) = value {
        let Ok(speed) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(camera.set_fan(speed).await);
    }
    out.push(format!("{key}={}", drv!(camera.fan())));
    ResultCode::Ok
}

pub async fn plugincmd(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let camera = camera!(daemon);
    let Some(command) = value else {
        return ResultCode::BadValue;
    };
    let reply = drv!(camera.custom_command(command).await);
    for line in reply.lines() {
        out.push(format!("{key}={line}"));
    }
    ResultCode::Ok
}

// --- session ---------------------------------------------------------------

pub async fn infty(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if let Some(value) = value {
        let Some(on) = parse_switch(value) else {
            return ResultCode::BadValue;
        };
        shared.session.infinite = on;
    }
    out.push(format!("{key}={}", u8::from(shared.session.infinite)));
    ResultCode::Ok
}

pub async fn filename(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if let Some(value) = value {
        // An empty assignment clears the name.
        shared.session.filename = (!value.is_empty()).then(|| value.to_string());
    }
    out.push(format!(
        "{key}={}",
        shared.session.filename.as_deref().unwrap_or("")
    ));
    ResultCode::Ok
}

pub async fn filenameprefix(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if let Some(value) = value {
        shared.session.filename_prefix = (!value.is_empty()).then(|| value.to_string());
    }
    out.push(format!(
        "{key}={}",
        shared.session.filename_prefix.as_deref().unwrap_or("")
    ));
    ResultCode::Ok
}

pub async fn rewrite(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if let Some(value) = value {
        let Some(on) = parse_switch(value) else {
            return ResultCode::BadValue;
        };
        shared.session.rewrite = on;
    }
    out.push(format!("{key}={}", u8::from(shared.session.rewrite)));
    ResultCode::Ok
}

pub async fn lastfilename(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if value.is_some() {
        return ResultCode::BadValue;
    }
    out.push(format!(
        "{key}={}",
        shared.session.last_filename.as_deref().unwrap_or("")
    ));
    ResultCode::Ok
}

pub async fn getheaders(
    daemon: &Daemon,
    shared: &mut Shared,
    _key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if value.is_some() {
        return ResultCode::BadValue;
    }
    for (key, value) in &shared.session.meta {
        out.push(format!("{key}={value}"));
    }
    if !shared.session.header_files.is_empty() {
        out.push(format!(
            "headerfiles={}",
            shared.session.header_files.join(",")
        ));
    }
    ResultCode::Ok
}

/// Shared handler for the FITS metadata keys. The key being dispatched
/// doubles as the metadata name.
pub async fn metadata(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if let Some(value) = value {
        if value.is_empty() {
            shared.session.meta.remove(key);
        } else {
            shared.session.meta.insert(key.to_string(), value.to_string());
        }
    }
    out.push(format!(
        "{key}={}",
        shared.session.meta.get(key).map(String::as_str).unwrap_or("")
    ));
    ResultCode::Ok
}

pub async fn headerfiles(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let _ = daemon;
    if let Some(value) = value {
        shared.session.header_files = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    out.push(format!("{key}={}", shared.session.header_files.join(",")));
    ResultCode::Ok
}

pub async fn restart_the_server(
    daemon: &Daemon,
    shared: &mut Shared,
    _key: &str,
    value: Option<&str>,
    _out: &mut Vec<String>,
) -> ResultCode {
    if value.is_some() {
        return ResultCode::BadValue;
    }
    tracing::warn!("client requested server restart");
    shared.flags.restart = true;
    daemon.wake_capture();
    ResultCode::Ok
}

// --- focuser ---------------------------------------------------------------

pub async fn foclist(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let Some(focuser) = daemon.devices.focuser.as_deref() else {
        return ResultCode::Fail;
    };
    if value.is_some() {
        return ResultCode::BadValue;
    }
    let count = drv!(focuser.probe().await);
    for index in 0..count {
        let name = drv!(focuser.device_name(index).await);
        out.push(format!("{key}={index}:{name}"));
    }
    ResultCode::Ok
}

pub async fn focdevno(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let Some(focuser) = daemon.devices.focuser.as_deref() else {
        return ResultCode::Fail;
    };
    if let Some(value) = value {
        let Ok(devno) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(focuser.select(devno).await);
        shared.session.foc_devno = devno;
    }
    out.push(format!("{key}={}", shared.session.foc_devno));
    ResultCode::Ok
}

pub async fn focpos(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let Some(focuser) = daemon.devices.focuser.as_deref() else {
        return ResultCode::Fail;
    };
    match value {
        Some("home") => drv!(focuser.home().await),
        Some(value) => {
            let Ok(steps) = value.parse::<i32>() else {
                return ResultCode::BadValue;
            };
            drv!(focuser.set_position(steps).await);
        }
        None => {}
    }
    out.push(format!("{key}={}", drv!(focuser.position().await)));
    ResultCode::Ok
}

// --- filter wheel ----------------------------------------------------------

pub async fn wlist(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let Some(wheel) = daemon.devices.wheel.as_deref() else {
        return ResultCode::Fail;
    };
    if value.is_some() {
        return ResultCode::BadValue;
    }
    let count = drv!(wheel.probe().await);
    for index in 0..count {
        let name = drv!(wheel.device_name(index).await);
        out.push(format!("{key}={index}:{name}"));
    }
    ResultCode::Ok
}

pub async fn wdevno(
    daemon: &Daemon,
    shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let Some(wheel) = daemon.devices.wheel.as_deref() else {
        return ResultCode::Fail;
    };
    if let Some(value) = value {
        let Ok(devno) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(wheel.select(devno).await);
        shared.session.wheel_devno = devno;
    }
    out.push(format!("{key}={}", shared.session.wheel_devno));
    ResultCode::Ok
}

pub async fn wpos(
    daemon: &Daemon,
    _shared: &mut Shared,
    key: &str,
    value: Option<&str>,
    out: &mut Vec<String>,
) -> ResultCode {
    let Some(wheel) = daemon.devices.wheel.as_deref() else {
        return ResultCode::Fail;
    };
    if let Some(value) = value {
        let Ok(slot) = value.parse::<u32>() else {
            return ResultCode::BadValue;
        };
        drv!(wheel.set_slot(slot).await);
    }
    out.push(format!("{key}={}", drv!(wheel.slot().await)));
    ResultCode::Ok
}
