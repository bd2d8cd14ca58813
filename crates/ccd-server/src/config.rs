//! Daemon configuration.
//!
//! Settings are layered: compiled-in defaults, then an optional TOML
//! file, then `CCDSERV_`-prefixed environment variables (`__` as the
//! section separator, e.g. `CCDSERV_CAPTURE__POLL_MAX_MS`).

use anyhow::Context;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Where the command listener binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ListenAddr {
    /// Parse `"unix:/path/to.sock"` or a TCP `host:port` pair.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            anyhow::ensure!(!path.is_empty(), "empty unix socket path");
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        let addr = s
            .parse::<SocketAddr>()
            .with_context(|| format!("'{s}' is neither unix:<path> nor host:port"))?;
        Ok(Self::Tcp(addr))
    }
}

/// Capture driver loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Shortest re-poll sleep while an exposure nears completion.
    pub poll_min_ms: u64,
    /// Longest re-poll sleep for long exposures.
    pub poll_max_ms: u64,
    /// Loop cadence outside the Capturing state.
    pub idle_poll_ms: u64,
    /// Temperature log sampling interval.
    pub temp_log_interval_s: u64,
    /// How far the driver's remaining-time estimate may go negative
    /// before the exposure is declared stuck and aborted. A tunable,
    /// not a derived bound.
    pub abort_tolerance_s: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_min_ms: 10,
            poll_max_ms: 1000,
            idle_poll_ms: 50,
            temp_log_interval_s: 60,
            abort_tolerance_s: 5.0,
        }
    }
}

/// Top-level daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Command listener: `host:port` or `unix:<path>`.
    pub listen: String,
    /// Optional one-shot image listener, TCP only.
    pub image_listen: Option<String>,
    /// Simultaneous command clients; excess connections are refused.
    pub max_clients: usize,
    /// Per-connection line buffer cap in bytes. Overflow drops the
    /// connection.
    pub line_buffer_max: usize,
    /// Bounded device-lock wait for command dispatch before replying
    /// BUSY.
    pub lock_wait_ms: u64,
    /// Directory holding the shared image segment file.
    pub shmem_dir: PathBuf,
    /// Segment key, advertised via the `shmemkey` command.
    pub shmem_key: String,
    /// Directory written frames land in.
    pub data_dir: PathBuf,
    /// Driver plugin identifier.
    pub plugin: String,
    /// Camera unit to select at startup.
    pub device_number: u32,
    /// Plugin-specific config table, passed to the factory verbatim.
    pub plugin_config: toml::Value,
    pub capture: CaptureSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5071".to_string(),
            image_listen: None,
            max_clients: 16,
            line_buffer_max: 4096,
            lock_wait_ms: 1000,
            shmem_dir: PathBuf::from("/dev/shm"),
            shmem_key: "0".to_string(),
            data_dir: PathBuf::from("."),
            plugin: "mock".to_string(),
            device_number: 0,
            plugin_config: toml::Value::Table(Default::default()),
            capture: CaptureSettings::default(),
        }
    }
}

impl ServerSettings {
    /// Load settings, layering an optional TOML file and the
    /// environment over the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Self = figment
            .merge(Env::prefixed("CCDSERV_").split("__"))
            .extract()
            .context("invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr()?;
        self.image_listen_addr()?;
        anyhow::ensure!(self.max_clients > 0, "max_clients must be at least 1");
        anyhow::ensure!(
            self.line_buffer_max >= 64,
            "line_buffer_max of {} cannot hold a command",
            self.line_buffer_max
        );
        anyhow::ensure!(
            self.capture.poll_min_ms <= self.capture.poll_max_ms,
            "capture poll_min_ms exceeds poll_max_ms"
        );
        anyhow::ensure!(
            self.capture.abort_tolerance_s >= 0.0,
            "abort_tolerance_s must be non-negative"
        );
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<ListenAddr> {
        ListenAddr::parse(&self.listen)
    }

    /// The image listener address, if one is configured.
    pub fn image_listen_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        match &self.image_listen {
            None => Ok(None),
            Some(s) => {
                let addr = s
                    .parse::<SocketAddr>()
                    .with_context(|| format!("image_listen '{s}' is not host:port"))?;
                Ok(Some(addr))
            }
        }
    }

    /// Path of the shared image segment file.
    pub fn segment_path(&self) -> PathBuf {
        ccd_shmem::segment_path(&self.shmem_dir, &self.shmem_key)
    }
}
