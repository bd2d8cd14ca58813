//! Driver factory and registry.
//!
//! Vendor plugins register a [`DriverFactory`] with the
//! [`DriverRegistry`] at the composition root; the daemon then builds
//! devices from a configuration-supplied plugin identifier. The
//! mechanism a factory uses to reach its hardware (linked SDK, dynamic
//! library, pure simulation) is an implementation detail behind this
//! registry.
//!
//! ```text
//! main.rs:      registry.register(MockFactory);
//! config:       plugin = "mock"
//! startup:      registry.build("mock", plugin_table).await -> DeviceSet
//! ```

use crate::capability::{Camera, FilterWheel, Focuser};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability bag returned by a factory.
///
/// A plugin provides whichever device families it drives; the daemon
/// treats an absent entry as "no such device attached".
#[derive(Default)]
pub struct DeviceSet {
    pub camera: Option<Arc<dyn Camera>>,
    pub focuser: Option<Arc<dyn Focuser>>,
    pub wheel: Option<Arc<dyn FilterWheel>>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, camera: Arc<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_focuser(mut self, focuser: Arc<dyn Focuser>) -> Self {
        self.focuser = Some(focuser);
        self
    }

    pub fn with_wheel(mut self, wheel: Arc<dyn FilterWheel>) -> Self {
        self.wheel = Some(wheel);
        self
    }
}

/// Factory for one driver family.
///
/// Factories are registered once at startup and live for the program's
/// lifetime. `validate()` runs before `build()` so configuration errors
/// surface before any hardware is touched.
pub trait DriverFactory: Send + Sync + 'static {
    /// Identifier matched against the config `plugin` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for logs and the `info` command.
    fn name(&self) -> &'static str;

    /// Validate the plugin's config table without touching hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Instantiate the driver and return its capability bag.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceSet>>;
}

/// Lookup from plugin identifier to factory.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<&'static str, Box<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Replaces any previous factory of the same
    /// driver type.
    pub fn register<F: DriverFactory>(&mut self, factory: F) {
        let key = factory.driver_type();
        if self.factories.insert(key, Box::new(factory)).is_some() {
            tracing::warn!(driver_type = key, "replacing existing driver factory");
        }
    }

    /// Registered driver type identifiers, sorted.
    pub fn driver_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Look up a factory by driver type.
    pub fn get(&self, driver_type: &str) -> Option<&dyn DriverFactory> {
        self.factories.get(driver_type).map(|f| f.as_ref())
    }

    /// Validate and build devices for the named plugin.
    pub async fn build(&self, driver_type: &str, config: toml::Value) -> Result<DeviceSet> {
        let factory = self.get(driver_type).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown plugin '{}' (registered: {})",
                driver_type,
                self.driver_types().join(", ")
            )
        })?;
        factory.validate(&config)?;
        tracing::info!(plugin = driver_type, name = factory.name(), "building driver");
        factory.build(config).await
    }
}
