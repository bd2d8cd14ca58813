//! Device capability contracts.
//!
//! The capability sets [`Camera`], [`Focuser`] and [`FilterWheel`]
//! abstract any vendor plugin behind one fixed operation set. Methods a
//! plugin does not implement fall through to default bodies returning
//! [`DriverError::Unsupported`]; callers must treat that exactly like a
//! failed call unless a fallback is documented.
//!
//! # Contract discipline
//!
//! - All traits are async (`#[async_trait]`), `Send + Sync`, and take
//!   `&self`; drivers use interior mutability for device state.
//! - `probe()` must be called before anything else, and setters must
//!   not be called when it reported zero devices.
//! - After `select()`, the array/field formats, pixel size and limits
//!   are populated and stable until `close()` or another `select()`.
//! - Setters validate against device-reported limits and fail rather
//!   than clamp. Geometry and binning setters are the one exception:
//!   they may adjust the request to the nearest hardware-supported
//!   value and must report the adjusted value back.

use crate::error::{DriverError, DriverResult};
use crate::geometry::FrameFormat;
use crate::image::BitDepth;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of polling an in-flight exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureStatus {
    /// Still exposing. Not an error.
    InProgress,
    /// Frame is ready to be read with [`Camera::read_frame`].
    Ready,
    /// The exposure never started; treat as a driver fault.
    CantStart,
    /// The exposure was aborted on the device side.
    Aborted,
}

/// Status plus the driver's estimate of seconds remaining.
///
/// The estimate may go negative when the driver is late; the capture
/// loop tolerates a bounded amount of that before declaring a
/// malfunction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturePoll {
    pub status: CaptureStatus,
    pub seconds_remaining: f64,
}

/// Exposure frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameKind {
    /// Shutter open, normal exposure.
    #[default]
    Light,
    /// Shutter closed, dark frame.
    Dark,
}

/// Device-reported limits, populated after [`Camera::select`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraLimits {
    /// Shortest supported exposure in seconds.
    pub min_exposure_s: f64,
    /// Longest supported exposure in seconds.
    pub max_exposure_s: f64,
    /// Maximum horizontal binning factor.
    pub max_hbin: u32,
    /// Maximum vertical binning factor.
    pub max_vbin: u32,
    /// Gain range, `None` when gain is not adjustable.
    pub gain: Option<(u32, u32)>,
    /// Brightness/offset range, `None` when not adjustable.
    pub brightness: Option<(u32, u32)>,
    /// Whether the sensor can be read out at 8 bits per pixel.
    pub supports_8bit: bool,
}

/// The camera capability contract.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Probe for hardware. Returns the number of devices found.
    ///
    /// Must be called before any other operation; when it returns 0 no
    /// setter may be called.
    async fn probe(&self) -> DriverResult<u32>;

    /// Human-readable name of one probed device.
    async fn device_name(&self, index: u32) -> DriverResult<String>;

    /// Select and fully initialize one physical unit.
    async fn select(&self, index: u32) -> DriverResult<()>;

    /// Release the selected device.
    async fn close(&self) -> DriverResult<()>;

    /// Full silicon including overscan. Stable after `select()`.
    fn array_format(&self) -> DriverResult<FrameFormat>;

    /// Usable field of view. Stable after `select()`.
    fn field_format(&self) -> DriverResult<FrameFormat>;

    /// Pixel pitch in micrometers `(x, y)`.
    fn pixel_size_um(&self) -> DriverResult<(f64, f64)> {
        Err(DriverError::Unsupported("pixel_size_um"))
    }

    /// Capability limits. Stable after `select()`.
    fn limits(&self) -> DriverResult<CameraLimits>;

    // --- configuration -----------------------------------------------------

    /// Set binning factors. May adjust to the nearest supported pair;
    /// reports the applied factors.
    async fn set_binning(&self, hbin: u32, vbin: u32) -> DriverResult<(u32, u32)>;

    /// Currently applied binning factors.
    fn binning(&self) -> DriverResult<(u32, u32)>;

    /// Set the sub-frame, in unbinned pixels. May adjust the rectangle
    /// to the nearest hardware-supported one; reports what was applied.
    async fn set_geometry(&self, geometry: FrameFormat) -> DriverResult<FrameFormat>;

    /// Currently configured sub-frame, in unbinned pixels.
    fn geometry(&self) -> DriverResult<FrameFormat>;

    /// Set exposure time in seconds. Fails (no clamping) outside the
    /// device range.
    async fn set_exposure(&self, seconds: f64) -> DriverResult<()>;

    /// Current exposure time in seconds.
    fn exposure(&self) -> DriverResult<f64>;

    /// Set analog gain.
    async fn set_gain(&self, gain: u32) -> DriverResult<()> {
        let _ = gain;
        Err(DriverError::Unsupported("set_gain"))
    }

    /// Current analog gain.
    fn gain(&self) -> DriverResult<u32> {
        Err(DriverError::Unsupported("gain"))
    }

    /// Set brightness / offset.
    async fn set_brightness(&self, brightness: u32) -> DriverResult<()> {
        let _ = brightness;
        Err(DriverError::Unsupported("set_brightness"))
    }

    /// Current brightness / offset.
    fn brightness(&self) -> DriverResult<u32> {
        Err(DriverError::Unsupported("brightness"))
    }

    /// Switch readout bit depth.
    async fn set_bit_depth(&self, depth: BitDepth) -> DriverResult<()> {
        let _ = depth;
        Err(DriverError::Unsupported("set_bit_depth"))
    }

    /// Current readout bit depth.
    fn bit_depth(&self) -> DriverResult<BitDepth>;

    /// Select light or dark frames.
    async fn set_frame_kind(&self, kind: FrameKind) -> DriverResult<()> {
        let _ = kind;
        Err(DriverError::Unsupported("set_frame_kind"))
    }

    /// Current frame type.
    fn frame_kind(&self) -> DriverResult<FrameKind> {
        Err(DriverError::Unsupported("frame_kind"))
    }

    /// Toggle fast (lower quality) readout.
    async fn set_fast_readout(&self, fast: bool) -> DriverResult<()> {
        let _ = fast;
        Err(DriverError::Unsupported("set_fast_readout"))
    }

    /// Whether fast readout is active.
    fn fast_readout(&self) -> DriverResult<bool> {
        Err(DriverError::Unsupported("fast_readout"))
    }

    /// Set fan speed (device-specific scale).
    async fn set_fan(&self, speed: u32) -> DriverResult<()> {
        let _ = speed;
        Err(DriverError::Unsupported("set_fan"))
    }

    /// Current fan speed.
    fn fan(&self) -> DriverResult<u32> {
        Err(DriverError::Unsupported("fan"))
    }

    /// Set shutter mode (device-specific scale).
    async fn set_shutter_mode(&self, mode: u32) -> DriverResult<()> {
        let _ = mode;
        Err(DriverError::Unsupported("set_shutter_mode"))
    }

    /// Current shutter mode.
    fn shutter_mode(&self) -> DriverResult<u32> {
        Err(DriverError::Unsupported("shutter_mode"))
    }

    /// Configure the auxiliary I/O port direction mask.
    async fn set_io_config(&self, config: u32) -> DriverResult<()> {
        let _ = config;
        Err(DriverError::Unsupported("set_io_config"))
    }

    /// Current I/O port direction mask.
    fn io_config(&self) -> DriverResult<u32> {
        Err(DriverError::Unsupported("io_config"))
    }

    /// Write the auxiliary I/O port.
    async fn set_io(&self, value: u32) -> DriverResult<()> {
        let _ = value;
        Err(DriverError::Unsupported("set_io"))
    }

    /// Read the auxiliary I/O port.
    fn io(&self) -> DriverResult<u32> {
        Err(DriverError::Unsupported("io"))
    }

    /// Set the number of pre-exposure clears.
    async fn set_flushes(&self, count: u32) -> DriverResult<()> {
        let _ = count;
        Err(DriverError::Unsupported("set_flushes"))
    }

    /// Current number of pre-exposure clears.
    fn flushes(&self) -> DriverResult<u32> {
        Err(DriverError::Unsupported("flushes"))
    }

    // --- capture -----------------------------------------------------------

    /// Begin an asynchronous exposure. Must not block for the exposure
    /// duration.
    async fn start_exposure(&self) -> DriverResult<()>;

    /// Non-blocking progress check.
    ///
    /// Returns `Err` only when the poll itself fails, never for "still
    /// exposing".
    async fn poll_capture(&self) -> DriverResult<CapturePoll>;

    /// Blocking read of the completed frame into caller storage sized
    /// for the current geometry and bit depth. Must not be called
    /// before [`poll_capture`](Self::poll_capture) reports `Ready`.
    async fn read_frame(&self, buf: &mut [u8]) -> DriverResult<()>;

    /// Best-effort abort of any in-flight exposure. Always safe to
    /// call, including when idle.
    async fn cancel(&self) -> DriverResult<()>;

    // --- side channels -----------------------------------------------------

    /// Sensor (cold side) temperature in degrees Celsius.
    async fn temperature(&self) -> DriverResult<f64> {
        Err(DriverError::Unsupported("temperature"))
    }

    /// Camera body temperature in degrees Celsius.
    async fn case_temperature(&self) -> DriverResult<f64> {
        Err(DriverError::Unsupported("case_temperature"))
    }

    /// Free-form plugin-specific command.
    ///
    /// This is the extension point for vendor tuning knobs that the
    /// fixed setter list cannot represent; the reply is streamed back
    /// verbatim through the `plugincmd` command.
    async fn custom_command(&self, command: &str) -> DriverResult<String> {
        let _ = command;
        Err(DriverError::Unsupported("custom_command"))
    }
}

/// The focuser capability contract.
///
/// Narrower than [`Camera`] but follows the same "absent =
/// unsupported, probe before use" discipline.
#[async_trait]
pub trait Focuser: Send + Sync {
    /// Probe for hardware. Returns the number of devices found.
    async fn probe(&self) -> DriverResult<u32>;

    /// Human-readable name of one probed device.
    async fn device_name(&self, index: u32) -> DriverResult<String>;

    /// Select and initialize one unit.
    async fn select(&self, index: u32) -> DriverResult<()>;

    /// Move to an absolute position in device steps.
    async fn set_position(&self, steps: i32) -> DriverResult<()>;

    /// Drive to the home/reference position.
    async fn home(&self) -> DriverResult<()> {
        Err(DriverError::Unsupported("home"))
    }

    /// Current position in device steps.
    async fn position(&self) -> DriverResult<i32>;
}

/// The filter wheel capability contract.
#[async_trait]
pub trait FilterWheel: Send + Sync {
    /// Probe for hardware. Returns the number of devices found.
    async fn probe(&self) -> DriverResult<u32>;

    /// Human-readable name of one probed device.
    async fn device_name(&self, index: u32) -> DriverResult<String>;

    /// Select and initialize one unit.
    async fn select(&self, index: u32) -> DriverResult<()>;

    /// Number of filter slots on the selected wheel.
    fn slot_count(&self) -> DriverResult<u32>;

    /// Rotate to a slot.
    async fn set_slot(&self, slot: u32) -> DriverResult<()>;

    /// Currently selected slot.
    async fn slot(&self) -> DriverResult<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareCamera;

    #[async_trait]
    impl Camera for BareCamera {
        async fn probe(&self) -> DriverResult<u32> {
            Ok(1)
        }
        async fn device_name(&self, _index: u32) -> DriverResult<String> {
            Ok("bare".into())
        }
        async fn select(&self, _index: u32) -> DriverResult<()> {
            Ok(())
        }
        async fn close(&self) -> DriverResult<()> {
            Ok(())
        }
        fn array_format(&self) -> DriverResult<FrameFormat> {
            Ok(FrameFormat::full(16, 16))
        }
        fn field_format(&self) -> DriverResult<FrameFormat> {
            Ok(FrameFormat::full(16, 16))
        }
        fn limits(&self) -> DriverResult<CameraLimits> {
            Ok(CameraLimits {
                min_exposure_s: 0.001,
                max_exposure_s: 3600.0,
                max_hbin: 1,
                max_vbin: 1,
                gain: None,
                brightness: None,
                supports_8bit: false,
            })
        }
        async fn set_binning(&self, h: u32, v: u32) -> DriverResult<(u32, u32)> {
            Ok((h.min(1), v.min(1)))
        }
        fn binning(&self) -> DriverResult<(u32, u32)> {
            Ok((1, 1))
        }
        async fn set_geometry(&self, g: FrameFormat) -> DriverResult<FrameFormat> {
            Ok(g)
        }
        fn geometry(&self) -> DriverResult<FrameFormat> {
            Ok(FrameFormat::full(16, 16))
        }
        async fn set_exposure(&self, _s: f64) -> DriverResult<()> {
            Ok(())
        }
        fn exposure(&self) -> DriverResult<f64> {
            Ok(1.0)
        }
        fn bit_depth(&self) -> DriverResult<BitDepth> {
            Ok(BitDepth::Bits16)
        }
        async fn start_exposure(&self) -> DriverResult<()> {
            Ok(())
        }
        async fn poll_capture(&self) -> DriverResult<CapturePoll> {
            Ok(CapturePoll {
                status: CaptureStatus::Ready,
                seconds_remaining: 0.0,
            })
        }
        async fn read_frame(&self, _buf: &mut [u8]) -> DriverResult<()> {
            Ok(())
        }
        async fn cancel(&self) -> DriverResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn absent_operations_report_unsupported() {
        let cam = BareCamera;
        assert!(matches!(
            cam.set_gain(5).await,
            Err(DriverError::Unsupported("set_gain"))
        ));
        assert!(matches!(
            cam.temperature().await,
            Err(DriverError::Unsupported("temperature"))
        ));
        assert!(matches!(
            cam.custom_command("x").await,
            Err(DriverError::Unsupported("custom_command"))
        ));
    }
}
