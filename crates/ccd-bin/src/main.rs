//! The ccdserv daemon binary: configuration, driver registration and
//! task wiring.

use anyhow::Result;
use ccd_core::driver::DriverRegistry;
use ccd_driver_mock::MockFactory;
use ccd_server::{capture, serve, Daemon, RawFrameWriter, ServerSettings};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ccdserv", version, about = "Networked CCD camera control daemon")]
struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Command listener address (`host:port` or `unix:<path>`),
    /// overrides the config file.
    #[arg(short, long)]
    listen: Option<String>,

    /// Driver plugin identifier, overrides the config file.
    #[arg(short, long)]
    plugin: Option<String>,

    /// Log filter, overrides RUST_LOG (e.g. `debug`, `ccd_server=trace`).
    #[arg(long)]
    log: Option<String>,
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let mut settings = ServerSettings::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        settings.listen = listen;
    }
    if let Some(plugin) = cli.plugin {
        settings.plugin = plugin;
    }
    settings.validate()?;

    let mut registry = DriverRegistry::new();
    registry.register(MockFactory);
    let devices = registry
        .build(&settings.plugin, settings.plugin_config.clone())
        .await?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        plugin = %settings.plugin,
        listen = %settings.listen,
        "ccdserv starting"
    );
    let daemon = Daemon::new(settings, devices, Arc::new(RawFrameWriter)).await?;
    capture::spawn(daemon.clone());

    tokio::select! {
        result = serve::run(daemon) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            Ok(())
        }
    }
}
