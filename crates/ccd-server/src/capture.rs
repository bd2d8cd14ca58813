//! The capture state machine driver.
//!
//! One task per daemon. Each iteration takes the device lock, services
//! the request flags, advances the state machine one step, then sleeps
//! for an interval chosen by the step: a fixed idle cadence outside
//! `Capturing`, or a sleep proportional to the driver's remaining-time
//! estimate while exposing, so a multi-minute exposure is not
//! busy-polled but completion is still caught within the shortest
//! sleep granularity.
//!
//! `FrameReady` and `Error` are terminal here. Only the protocol
//! server clears them, after broadcasting the transition, so a frame
//! can never be overwritten before clients were told about it.

use crate::config::CaptureSettings;
use crate::context::{refresh_frame_dims, Daemon, Shared};
use crate::writer::FrameTarget;
use ccd_core::capability::{Camera, CaptureStatus};
use ccd_core::image::FrameStats;
use ccd_core::state::CaptureState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub fn spawn(daemon: Arc<Daemon>) -> JoinHandle<()> {
    tokio::spawn(run(daemon))
}

pub async fn run(daemon: Arc<Daemon>) {
    // First temperature sample lands one interval after startup.
    let mut last_temp_log = Instant::now();
    loop {
        let sleep = step(&daemon, &mut last_temp_log).await;
        // A freshly raised request flag cuts the sleep short, so a
        // cancel lands within one step even when a long exposure has
        // the loop sleeping at the slow bound.
        tokio::select! {
            () = tokio::time::sleep(sleep) => {}
            () = daemon.capture_wakeup() => {}
        }
    }
}

async fn step(daemon: &Daemon, last_temp_log: &mut Instant) -> Duration {
    let opts = &daemon.settings.capture;
    let idle = Duration::from_millis(opts.idle_poll_ms);
    let mut shared = daemon.lock().await;

    if shared.flags.restart {
        tracing::warn!("operator restart requested, terminating");
        std::process::exit(0);
    }

    let Some(camera) = daemon.devices.camera.as_deref() else {
        return idle;
    };

    if shared.flags.cancel {
        shared.flags.cancel = false;
        shared.flags.start = false;
        shared.session.infinite = false;
        if let Err(err) = camera.cancel().await {
            tracing::warn!(error = %err, "driver cancel failed");
        }
        shared.seconds_remaining = 0.0;
        daemon.set_state(&mut shared, CaptureState::Idle);
        tracing::info!("capture cancelled");
        return idle;
    }

    if last_temp_log.elapsed() >= Duration::from_secs(opts.temp_log_interval_s) {
        *last_temp_log = Instant::now();
        log_temperatures(camera).await;
    }

    match shared.state {
        CaptureState::Idle => {
            if shared.session.infinite && daemon.client_count() > 0 {
                shared.flags.start = true;
            }
            if shared.flags.start {
                shared.flags.start = false;
                begin_exposure(daemon, camera, &mut shared).await;
            }
            idle
        }
        CaptureState::Capturing => poll_exposure(daemon, camera, &mut shared, opts).await,
        // Terminal until the protocol server resets to Idle.
        CaptureState::FrameReady | CaptureState::Error => idle,
    }
}

async fn begin_exposure(daemon: &Daemon, camera: &dyn Camera, shared: &mut Shared) {
    refresh_frame_dims(camera, shared);
    match camera.start_exposure().await {
        Ok(()) => {
            shared.seconds_remaining = camera.exposure().unwrap_or(0.0);
            daemon.set_state(shared, CaptureState::Capturing);
            tracing::info!(
                exposure_s = shared.seconds_remaining,
                "exposure started"
            );
        }
        Err(err) => {
            tracing::warn!(error = %err, "exposure start failed");
            daemon.set_state(shared, CaptureState::Error);
        }
    }
}

async fn poll_exposure(
    daemon: &Daemon,
    camera: &dyn Camera,
    shared: &mut Shared,
    opts: &CaptureSettings,
) -> Duration {
    let idle = Duration::from_millis(opts.idle_poll_ms);
    let poll = match camera.poll_capture().await {
        Ok(poll) => poll,
        Err(err) => {
            tracing::warn!(error = %err, "capture poll failed");
            daemon.set_state(shared, CaptureState::Error);
            return idle;
        }
    };
    match poll.status {
        CaptureStatus::InProgress => {
            shared.seconds_remaining = poll.seconds_remaining;
            if poll.seconds_remaining < -opts.abort_tolerance_s {
                tracing::error!(
                    overdue_s = -poll.seconds_remaining,
                    "driver overdue past tolerance, aborting exposure"
                );
                if let Err(err) = camera.cancel().await {
                    tracing::warn!(error = %err, "driver cancel failed");
                }
                daemon.set_state(shared, CaptureState::Error);
                return idle;
            }
            adaptive_sleep(poll.seconds_remaining, opts)
        }
        CaptureStatus::Ready => {
            finish_frame(daemon, camera, shared).await;
            idle
        }
        CaptureStatus::CantStart | CaptureStatus::Aborted => {
            tracing::warn!(status = ?poll.status, "exposure lost on the device side");
            daemon.set_state(shared, CaptureState::Error);
            idle
        }
    }
}

/// Sleep half the remaining time, clamped to the configured window.
fn adaptive_sleep(seconds_remaining: f64, opts: &CaptureSettings) -> Duration {
    let min = opts.poll_min_ms as f64 / 1000.0;
    let max = opts.poll_max_ms as f64 / 1000.0;
    Duration::from_secs_f64((seconds_remaining.max(0.0) * 0.5).clamp(min, max))
}

async fn finish_frame(daemon: &Daemon, camera: &dyn Camera, shared: &mut Shared) {
    let (Ok(geometry), Ok((hbin, vbin)), Ok(depth)) =
        (camera.geometry(), camera.binning(), camera.bit_depth())
    else {
        tracing::warn!("device lost its format mid-capture");
        daemon.set_state(shared, CaptureState::Error);
        return;
    };
    let binned = geometry.binned(hbin, vbin);
    let len = binned.pixel_count() as usize * depth.bytes_per_pixel();

    let stats = {
        let buf = match shared.segment.payload_mut(len) {
            Ok(buf) => buf,
            Err(err) => {
                tracing::error!(error = %err, "frame does not fit the shared segment");
                daemon.set_state(shared, CaptureState::Error);
                return;
            }
        };
        if let Err(err) = camera.read_frame(buf).await {
            tracing::warn!(error = %err, "frame readout failed");
            daemon.set_state(shared, CaptureState::Error);
            return;
        }
        FrameStats::compute(buf, depth)
    };

    let mut header = shared.segment.header();
    header.counter += 1;
    header.timestamp_ms = chrono::Utc::now().timestamp_millis();
    header.width = binned.width;
    header.height = binned.height;
    header.bitpix = depth.bits();
    header.data_len = len as u64;
    header.stats_valid = u32::from(stats.is_some());
    if let Some(stats) = stats {
        header.min = stats.min;
        header.max = stats.max;
        header.mean = stats.mean;
        header.std = stats.std;
    }
    shared.segment.set_header(&header);
    shared.seconds_remaining = 0.0;

    if shared.session.filename.is_some() || shared.session.filename_prefix.is_some() {
        let target = FrameTarget {
            dir: &daemon.settings.data_dir,
            filename: shared.session.filename.as_deref(),
            prefix: shared.session.filename_prefix.as_deref(),
            rewrite: shared.session.rewrite,
        };
        match daemon
            .writer
            .write_frame(&header, shared.segment.payload(), &shared.session.meta, &target)
            .await
        {
            Ok(path) => {
                let name = path.display().to_string();
                shared.session.last_filename = Some(name.clone());
                shared.session.announce_filename = Some(name);
            }
            Err(err) => tracing::warn!(error = %err, "frame writer failed"),
        }
    }

    daemon.set_state(shared, CaptureState::FrameReady);
    tracing::info!(counter = header.counter, bytes = len, "frame ready");
}

async fn log_temperatures(camera: &dyn Camera) {
    match camera.temperature().await {
        Ok(cold) => match camera.case_temperature().await {
            Ok(case) => tracing::info!(cold_c = cold, case_c = case, "camera temperature"),
            Err(_) => tracing::info!(cold_c = cold, "camera temperature"),
        },
        // Unsupported getters just mute the side channel.
        Err(err) => tracing::debug!(error = %err, "temperature not available"),
    }
}
