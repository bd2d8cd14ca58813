//! Simulated CCD camera.
//!
//! Implements the full [`Camera`] contract with realistic timing: an
//! exposure takes its configured wall-clock duration plus a readout
//! latency, `poll_capture` reports real remaining time, and the sensor
//! temperature drifts exponentially toward a setpoint the way a cooled
//! CCD does.

use crate::pattern::{fill_frame, PatternParams};
use async_trait::async_trait;
use ccd_core::capability::{
    Camera, CameraLimits, CapturePoll, CaptureStatus, FrameKind,
};
use ccd_core::error::{DriverError, DriverResult};
use ccd_core::geometry::FrameFormat;
use ccd_core::image::BitDepth;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::time::Instant;

/// Configuration for the simulated camera.
#[derive(Debug, Clone, Deserialize)]
pub struct MockCameraConfig {
    /// Sensor width in pixels (default 1024).
    #[serde(default = "default_width")]
    pub width: u32,
    /// Sensor height in pixels (default 1024).
    #[serde(default = "default_height")]
    pub height: u32,
    /// Overscan margin beyond the field, per edge (default 8).
    #[serde(default = "default_overscan")]
    pub overscan: u32,
    /// Simulated readout latency in seconds (default 0.05).
    #[serde(default = "default_readout")]
    pub readout_s: f64,
    /// Cooler setpoint in degrees Celsius (default -10).
    #[serde(default = "default_setpoint")]
    pub setpoint_c: f64,
    /// Noise sigma in counts (default 20).
    #[serde(default = "default_noise")]
    pub noise_sigma: f64,
    /// RNG seed; fixed seed makes frames reproducible in tests.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_width() -> u32 {
    1024
}
fn default_height() -> u32 {
    1024
}
fn default_overscan() -> u32 {
    8
}
fn default_readout() -> f64 {
    0.05
}
fn default_setpoint() -> f64 {
    -10.0
}
fn default_noise() -> f64 {
    20.0
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            overscan: default_overscan(),
            readout_s: default_readout(),
            setpoint_c: default_setpoint(),
            noise_sigma: default_noise(),
            seed: None,
        }
    }
}

/// One in-flight exposure.
struct Exposure {
    started: Instant,
    duration_s: f64,
}

/// Exponential drift toward the cooler setpoint.
struct TemperatureModel {
    current: f64,
    setpoint: f64,
    last_update: Instant,
}

impl TemperatureModel {
    fn new(setpoint: f64) -> Self {
        Self {
            current: 20.0,
            setpoint,
            last_update: Instant::now(),
        }
    }

    fn sample(&mut self) -> f64 {
        let dt = self.last_update.elapsed().as_secs_f64();
        self.last_update = Instant::now();
        let diff = self.setpoint - self.current;
        // Time constant of ~30 s, roughly a small TEC.
        self.current += diff * (1.0 - (-dt / 30.0).exp());
        self.current
    }
}

struct Inner {
    selected: bool,
    geometry: FrameFormat,
    hbin: u32,
    vbin: u32,
    exposure_s: f64,
    gain: u32,
    brightness: u32,
    depth: BitDepth,
    kind: FrameKind,
    fast: bool,
    shutter_mode: u32,
    io_config: u32,
    io: u32,
    flushes: u32,
    fan: u32,
    exposure: Option<Exposure>,
    temperature: TemperatureModel,
    rng: StdRng,
}

/// Simulated CCD camera.
pub struct MockCamera {
    config: MockCameraConfig,
    array: FrameFormat,
    field: FrameFormat,
    inner: Mutex<Inner>,
}

impl MockCamera {
    pub fn new(config: MockCameraConfig) -> Self {
        let array = FrameFormat::full(
            config.width + 2 * config.overscan,
            config.height + 2 * config.overscan,
        );
        let field = FrameFormat {
            width: config.width,
            height: config.height,
            x_off: config.overscan,
            y_off: config.overscan,
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let inner = Inner {
            selected: false,
            geometry: array,
            hbin: 1,
            vbin: 1,
            exposure_s: 1.0,
            gain: 10,
            brightness: 128,
            depth: BitDepth::Bits16,
            kind: FrameKind::Light,
            fast: false,
            shutter_mode: 0,
            io_config: 0,
            io: 0,
            flushes: 1,
            fan: 0,
            exposure: None,
            temperature: TemperatureModel::new(config.setpoint_c),
            rng,
        };
        Self {
            config,
            array,
            field,
            inner: Mutex::new(inner),
        }
    }

    fn limits_value(&self) -> CameraLimits {
        CameraLimits {
            min_exposure_s: 0.001,
            max_exposure_s: 3600.0,
            max_hbin: 4,
            max_vbin: 4,
            gain: Some((0, 63)),
            brightness: Some((0, 255)),
            supports_8bit: true,
        }
    }

    fn check_selected(inner: &Inner) -> DriverResult<()> {
        if inner.selected {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn probe(&self) -> DriverResult<u32> {
        Ok(1)
    }

    async fn device_name(&self, index: u32) -> DriverResult<String> {
        if index != 0 {
            return Err(DriverError::NoDevice);
        }
        Ok(format!(
            "Mock CCD {}x{}",
            self.config.width, self.config.height
        ))
    }

    async fn select(&self, index: u32) -> DriverResult<()> {
        if index != 0 {
            return Err(DriverError::NoDevice);
        }
        let mut inner = self.inner.lock();
        inner.selected = true;
        inner.geometry = self.array;
        inner.exposure = None;
        tracing::debug!("mock camera selected");
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        inner.selected = false;
        inner.exposure = None;
        Ok(())
    }

    fn array_format(&self) -> DriverResult<FrameFormat> {
        Self::check_selected(&self.inner.lock())?;
        Ok(self.array)
    }

    fn field_format(&self) -> DriverResult<FrameFormat> {
        Self::check_selected(&self.inner.lock())?;
        Ok(self.field)
    }

    fn pixel_size_um(&self) -> DriverResult<(f64, f64)> {
        Ok((13.5, 13.5))
    }

    fn limits(&self) -> DriverResult<CameraLimits> {
        Self::check_selected(&self.inner.lock())?;
        Ok(self.limits_value())
    }

    async fn set_binning(&self, hbin: u32, vbin: u32) -> DriverResult<(u32, u32)> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        let limits = self.limits_value();
        // Binning is a geometry-class setter: adjust, don't refuse.
        let hbin = hbin.clamp(1, limits.max_hbin);
        let vbin = vbin.clamp(1, limits.max_vbin);
        inner.hbin = hbin;
        inner.vbin = vbin;
        Ok((hbin, vbin))
    }

    fn binning(&self) -> DriverResult<(u32, u32)> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok((inner.hbin, inner.vbin))
    }

    async fn set_geometry(&self, geometry: FrameFormat) -> DriverResult<FrameFormat> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        let adjusted = geometry.clamped_to(&self.array);
        if adjusted.width == 0 || adjusted.height == 0 {
            return Err(DriverError::invalid("sub-frame outside sensor array"));
        }
        inner.geometry = adjusted;
        Ok(adjusted)
    }

    fn geometry(&self) -> DriverResult<FrameFormat> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.geometry)
    }

    async fn set_exposure(&self, seconds: f64) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        let limits = self.limits_value();
        if !(limits.min_exposure_s..=limits.max_exposure_s).contains(&seconds) {
            return Err(DriverError::invalid(format!(
                "exposure {seconds}s outside {}..{}s",
                limits.min_exposure_s, limits.max_exposure_s
            )));
        }
        inner.exposure_s = seconds;
        Ok(())
    }

    fn exposure(&self) -> DriverResult<f64> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.exposure_s)
    }

    async fn set_gain(&self, gain: u32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        match self.limits_value().gain {
            Some((lo, hi)) if (lo..=hi).contains(&gain) => {
                inner.gain = gain;
                Ok(())
            }
            _ => Err(DriverError::invalid(format!("gain {gain} out of range"))),
        }
    }

    fn gain(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.gain)
    }

    async fn set_brightness(&self, brightness: u32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        match self.limits_value().brightness {
            Some((lo, hi)) if (lo..=hi).contains(&brightness) => {
                inner.brightness = brightness;
                Ok(())
            }
            _ => Err(DriverError::invalid(format!(
                "brightness {brightness} out of range"
            ))),
        }
    }

    fn brightness(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.brightness)
    }

    async fn set_bit_depth(&self, depth: BitDepth) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        inner.depth = depth;
        Ok(())
    }

    fn bit_depth(&self) -> DriverResult<BitDepth> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.depth)
    }

    async fn set_frame_kind(&self, kind: FrameKind) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        inner.kind = kind;
        Ok(())
    }

    fn frame_kind(&self) -> DriverResult<FrameKind> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.kind)
    }

    async fn set_fast_readout(&self, fast: bool) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        inner.fast = fast;
        Ok(())
    }

    fn fast_readout(&self) -> DriverResult<bool> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.fast)
    }

    async fn set_shutter_mode(&self, mode: u32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        if mode > 2 {
            return Err(DriverError::invalid(format!("shutter mode {mode}")));
        }
        inner.shutter_mode = mode;
        Ok(())
    }

    fn shutter_mode(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.shutter_mode)
    }

    async fn set_io_config(&self, config: u32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        inner.io_config = config;
        Ok(())
    }

    fn io_config(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.io_config)
    }

    async fn set_io(&self, value: u32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        inner.io = value;
        Ok(())
    }

    fn io(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.io)
    }

    async fn set_flushes(&self, count: u32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        if count > 16 {
            return Err(DriverError::invalid(format!("flush count {count}")));
        }
        inner.flushes = count;
        Ok(())
    }

    fn flushes(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.flushes)
    }

    async fn set_fan(&self, speed: u32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        if speed > 3 {
            return Err(DriverError::invalid(format!("fan speed {speed}")));
        }
        inner.fan = speed;
        Ok(())
    }

    fn fan(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.fan)
    }

    async fn start_exposure(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        if inner.exposure.is_some() {
            return Err(DriverError::hardware("exposure already in progress"));
        }
        let duration_s = inner.exposure_s + self.config.readout_s;
        inner.exposure = Some(Exposure {
            started: Instant::now(),
            duration_s,
        });
        Ok(())
    }

    async fn poll_capture(&self) -> DriverResult<CapturePoll> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        match &inner.exposure {
            None => Ok(CapturePoll {
                status: CaptureStatus::Aborted,
                seconds_remaining: 0.0,
            }),
            Some(exposure) => {
                let remaining = exposure.duration_s - exposure.started.elapsed().as_secs_f64();
                if remaining <= 0.0 {
                    Ok(CapturePoll {
                        status: CaptureStatus::Ready,
                        seconds_remaining: 0.0,
                    })
                } else {
                    Ok(CapturePoll {
                        status: CaptureStatus::InProgress,
                        seconds_remaining: remaining,
                    })
                }
            }
        }
    }

    async fn read_frame(&self, buf: &mut [u8]) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        let exposure = inner
            .exposure
            .take()
            .ok_or_else(|| DriverError::hardware("no completed exposure to read"))?;
        if exposure.started.elapsed().as_secs_f64() < exposure.duration_s {
            // Put it back; the caller polled too early.
            inner.exposure = Some(exposure);
            return Err(DriverError::hardware("frame not ready"));
        }
        let binned = inner.geometry.binned(inner.hbin, inner.vbin);
        let expected = binned.pixel_count() as usize * inner.depth.bytes_per_pixel();
        if buf.len() != expected {
            return Err(DriverError::invalid(format!(
                "buffer is {} bytes, frame needs {expected}",
                buf.len()
            )));
        }
        let params = PatternParams {
            width: binned.width,
            height: binned.height,
            depth: inner.depth,
            kind: inner.kind,
            gain: inner.gain,
            noise_sigma: self.config.noise_sigma,
        };
        let Inner { rng, .. } = &mut *inner;
        fill_frame(&params, rng, buf);
        Ok(())
    }

    async fn cancel(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        inner.exposure = None;
        Ok(())
    }

    async fn temperature(&self) -> DriverResult<f64> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(inner.temperature.sample())
    }

    async fn case_temperature(&self) -> DriverResult<f64> {
        let inner = self.inner.lock();
        Self::check_selected(&inner)?;
        Ok(22.0)
    }

    async fn custom_command(&self, command: &str) -> DriverResult<String> {
        let mut inner = self.inner.lock();
        Self::check_selected(&inner)?;
        match command.split_once(' ') {
            Some(("seed", value)) => {
                let seed: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| DriverError::invalid("seed must be an integer"))?;
                inner.rng = StdRng::seed_from_u64(seed);
                Ok(format!("seed={seed}"))
            }
            None if command == "id" => Ok("mock-ccd-sim".to_string()),
            _ => Err(DriverError::invalid(format!(
                "unknown plugin command '{command}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected_camera() -> MockCamera {
        let camera = MockCamera::new(MockCameraConfig {
            width: 64,
            height: 48,
            overscan: 4,
            readout_s: 0.0,
            seed: Some(1),
            ..Default::default()
        });
        futures::executor::block_on(camera.select(0)).unwrap();
        camera
    }

    #[tokio::test]
    async fn exposure_lifecycle() {
        let camera = selected_camera();
        camera.set_exposure(0.01).await.unwrap();
        camera.start_exposure().await.unwrap();

        // Eventually ready.
        let poll = loop {
            let poll = camera.poll_capture().await.unwrap();
            if poll.status == CaptureStatus::Ready {
                break poll;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        };
        assert_eq!(poll.seconds_remaining, 0.0);

        let geometry = camera.geometry().unwrap();
        let mut buf = vec![0u8; geometry.pixel_count() as usize * 2];
        camera.read_frame(&mut buf).await.unwrap();
        assert!(buf.iter().any(|&b| b != 0));

        // Second read without a new exposure fails.
        assert!(camera.read_frame(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn cancel_is_always_safe() {
        let camera = selected_camera();
        camera.cancel().await.unwrap();
        camera.set_exposure(10.0).await.unwrap();
        camera.start_exposure().await.unwrap();
        camera.cancel().await.unwrap();
        let poll = camera.poll_capture().await.unwrap();
        assert_eq!(poll.status, CaptureStatus::Aborted);
    }

    #[tokio::test]
    async fn geometry_setter_adjusts_instead_of_failing() {
        let camera = selected_camera();
        let array = camera.array_format().unwrap();
        let wild = FrameFormat {
            width: 10_000,
            height: 10_000,
            x_off: 10,
            y_off: 10,
        };
        let adjusted = camera.set_geometry(wild).await.unwrap();
        assert!(adjusted.contained_in(&array));
        assert_eq!(camera.geometry().unwrap(), adjusted);
    }

    #[tokio::test]
    async fn scalar_setters_fail_out_of_range() {
        let camera = selected_camera();
        assert!(camera.set_exposure(0.0).await.is_err());
        assert!(camera.set_gain(64).await.is_err());
        assert!(camera.set_brightness(256).await.is_err());
        // In-range values stick.
        camera.set_gain(63).await.unwrap();
        assert_eq!(camera.gain().unwrap(), 63);
    }

    #[tokio::test]
    async fn operations_require_selection() {
        let camera = MockCamera::new(MockCameraConfig::default());
        assert!(matches!(
            camera.geometry(),
            Err(DriverError::NotConnected)
        ));
        assert!(camera.start_exposure().await.is_err());
    }
}
