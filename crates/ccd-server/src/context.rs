//! The daemon context: devices, shared capture state and the device
//! lock.
//!
//! Everything the capture driver and the command dispatcher contend
//! over lives in [`Shared`], behind one `tokio::sync::Mutex` (the
//! device lock). The dispatcher only ever takes the lock with a
//! bounded wait; the capture driver takes it once per loop iteration.

use crate::config::ServerSettings;
use crate::writer::FrameWriter;
use anyhow::Context;
use ccd_core::capability::Camera;
use ccd_core::driver::DeviceSet;
use ccd_core::error::DaemonError;
use ccd_core::state::{CaptureState, RequestFlags};
use ccd_shmem::ImageSegment;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, MutexGuard, Notify};

/// Per-daemon session state set by clients and consumed at capture
/// time.
#[derive(Debug, Default)]
pub struct Session {
    pub cam_devno: u32,
    pub foc_devno: u32,
    pub wheel_devno: u32,
    /// Free-running capture mode: the driver loop re-arms itself while
    /// a client is connected.
    pub infinite: bool,
    /// Explicit output file name for the next written frame.
    pub filename: Option<String>,
    /// Prefix for counter-derived file names when no explicit name is
    /// set.
    pub filename_prefix: Option<String>,
    /// Whether an existing output file may be overwritten.
    pub rewrite: bool,
    /// Name of the last written frame, for the `lastfilename` getter.
    pub last_filename: Option<String>,
    /// Written file name not yet announced to clients. Taken exactly
    /// once by the terminal-state broadcast.
    pub announce_filename: Option<String>,
    /// FITS-style metadata key/value pairs.
    pub meta: BTreeMap<String, String>,
    /// Extra header files merged in by the frame writer.
    pub header_files: Vec<String>,
}

/// State guarded by the device lock.
pub struct Shared {
    pub state: CaptureState,
    pub flags: RequestFlags,
    pub segment: ImageSegment,
    /// Last remaining-time estimate from the driver, for `tremain`.
    pub seconds_remaining: f64,
    pub session: Session,
}

/// The daemon context shared by the capture driver, the dispatcher and
/// the connection multiplexer.
pub struct Daemon {
    pub settings: ServerSettings,
    pub devices: DeviceSet,
    pub writer: Arc<dyn FrameWriter>,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<CaptureState>,
    notify_tx: broadcast::Sender<String>,
    wake: Notify,
    clients: AtomicUsize,
}

impl Daemon {
    /// Build the context: select the configured camera, create the
    /// shared image segment at the largest size the sensor can
    /// produce, and best-effort select auxiliary devices.
    ///
    /// Segment creation failure is fatal; without it there is nowhere
    /// to put pixels.
    pub async fn new(
        settings: ServerSettings,
        devices: DeviceSet,
        writer: Arc<dyn FrameWriter>,
    ) -> anyhow::Result<Arc<Self>> {
        let camera = devices
            .camera
            .as_deref()
            .context("plugin provides no camera")?;
        let count = camera.probe().await?;
        anyhow::ensure!(
            settings.device_number < count,
            "camera device {} not present ({count} found)",
            settings.device_number
        );
        camera.select(settings.device_number).await?;
        let array = camera.array_format()?;
        let capacity = array.pixel_count() as usize * 2;
        let segment = ImageSegment::create(&settings.segment_path(), capacity)
            .map_err(|err| DaemonError::Shmem(err.to_string()))?;

        if let Some(focuser) = devices.focuser.as_deref() {
            match focuser.probe().await {
                Ok(n) if n > 0 => {
                    if let Err(err) = focuser.select(0).await {
                        tracing::warn!(error = %err, "focuser select failed");
                    }
                }
                Ok(_) => tracing::info!("no focusers found"),
                Err(err) => tracing::warn!(error = %err, "focuser probe failed"),
            }
        }
        if let Some(wheel) = devices.wheel.as_deref() {
            match wheel.probe().await {
                Ok(n) if n > 0 => {
                    if let Err(err) = wheel.select(0).await {
                        tracing::warn!(error = %err, "filter wheel select failed");
                    }
                }
                Ok(_) => tracing::info!("no filter wheels found"),
                Err(err) => tracing::warn!(error = %err, "filter wheel probe failed"),
            }
        }

        let mut shared = Shared {
            state: CaptureState::Idle,
            flags: RequestFlags::default(),
            segment,
            seconds_remaining: 0.0,
            session: Session {
                cam_devno: settings.device_number,
                ..Session::default()
            },
        };
        refresh_frame_dims(camera, &mut shared);

        let (state_tx, _) = watch::channel(CaptureState::Idle);
        let (notify_tx, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            settings,
            devices,
            writer,
            shared: Mutex::new(shared),
            state_tx,
            notify_tx,
            wake: Notify::new(),
            clients: AtomicUsize::new(0),
        }))
    }

    /// Take the device lock, waiting as long as it takes. Capture
    /// driver use only.
    pub async fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().await
    }

    /// Take the device lock with the configured bounded wait. `None`
    /// maps to a BUSY reply.
    pub async fn lock_bounded(&self) -> Option<MutexGuard<'_, Shared>> {
        let wait = Duration::from_millis(self.settings.lock_wait_ms);
        tokio::time::timeout(wait, self.shared.lock()).await.ok()
    }

    /// Change the capture state and publish it to the state watcher.
    pub fn set_state(&self, shared: &mut Shared, state: CaptureState) {
        if shared.state != state {
            tracing::debug!(from = %shared.state, to = %state, "capture state");
        }
        shared.state = state;
        let _ = self.state_tx.send(state);
    }

    /// Subscribe to capture state transitions.
    pub fn state_rx(&self) -> watch::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    /// Wake the capture driver out of its inter-poll sleep. Handlers
    /// call this after raising a request flag so the flag is serviced
    /// immediately instead of after the sleep expires.
    pub fn wake_capture(&self) {
        self.wake.notify_one();
    }

    /// Wait until [`wake_capture`](Self::wake_capture) is called. A
    /// wake that arrived before this call completes it immediately.
    pub async fn capture_wakeup(&self) {
        self.wake.notified().await;
    }

    /// Subscribe to the unsolicited broadcast channel.
    pub fn notifications(&self) -> broadcast::Receiver<String> {
        self.notify_tx.subscribe()
    }

    /// Send one line to every connected client.
    pub fn broadcast(&self, line: String) {
        let _ = self.notify_tx.send(line);
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Register a new client if under the cap; `false` means refuse.
    pub fn client_connected(&self) -> bool {
        let prior = self.clients.fetch_add(1, Ordering::SeqCst);
        if prior >= self.settings.max_clients {
            self.clients.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn client_disconnected(&self) {
        self.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Restamp the segment header for the camera's confirmed geometry,
/// binning and bit depth, invalidating any previous frame.
///
/// Called only after a device setter confirmed the new values, never
/// on the requested ones.
pub fn refresh_frame_dims(camera: &dyn Camera, shared: &mut Shared) {
    let (Ok(geometry), Ok((hbin, vbin)), Ok(depth)) =
        (camera.geometry(), camera.binning(), camera.bit_depth())
    else {
        return;
    };
    let binned = geometry.binned(hbin, vbin);
    let mut header = shared.segment.header();
    header.width = binned.width;
    header.height = binned.height;
    header.bitpix = depth.bits();
    header.stats_valid = 0;
    header.data_len = 0;
    shared.segment.set_header(&header);
}
