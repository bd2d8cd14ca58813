//! Simulated devices for testing and development without hardware.
//!
//! The `mock` plugin provides a camera with realistic exposure timing
//! and temperature drift, a focuser and a filter wheel. It is the
//! default plugin when no hardware configuration is given, and the
//! backbone of the server's test suite.

pub mod camera;
pub mod focuser;
pub mod pattern;
pub mod wheel;

pub use camera::{MockCamera, MockCameraConfig};
pub use focuser::MockFocuser;
pub use wheel::MockWheel;

use anyhow::Result;
use ccd_core::driver::{DeviceSet, DriverFactory};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;

/// Config table for the `mock` plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    /// Camera settings.
    #[serde(default)]
    pub camera: MockCameraConfig,
    /// Attach the simulated focuser (default true).
    #[serde(default = "default_true")]
    pub focuser: bool,
    /// Attach the simulated filter wheel (default true).
    #[serde(default = "default_true")]
    pub wheel: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            camera: MockCameraConfig::default(),
            focuser: true,
            wheel: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Factory for the `mock` plugin.
pub struct MockFactory;

impl DriverFactory for MockFactory {
    fn driver_type(&self) -> &'static str {
        "mock"
    }

    fn name(&self) -> &'static str {
        "Simulated CCD rig"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockConfig = config.clone().try_into()?;
        if cfg.camera.width == 0 || cfg.camera.height == 0 {
            anyhow::bail!("camera resolution must be non-zero");
        }
        if cfg.camera.readout_s < 0.0 {
            anyhow::bail!("readout latency must be non-negative");
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceSet>> {
        Box::pin(async move {
            let cfg: MockConfig = config.try_into()?;
            let mut set = DeviceSet::new().with_camera(Arc::new(MockCamera::new(cfg.camera)));
            if cfg.focuser {
                set = set.with_focuser(Arc::new(MockFocuser::new()));
            }
            if cfg.wheel {
                set = set.with_wheel(Arc::new(MockWheel::new()));
            }
            Ok(set)
        })
    }
}
